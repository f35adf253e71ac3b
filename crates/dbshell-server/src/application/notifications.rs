//! Observable notifications emitted by server facades and drivers.
//!
//! A [`NotificationHub`] is a small ordered observer registry.  Anything that
//! wants to watch a facade (a view, a log sink, another facade) subscribes to
//! the hub and receives every [`Notification`] it emits, in registration order.
//!
//! # Subscribers and relays (for beginners)
//!
//! There are two sorts of subscription:
//!
//! - **Direct subscriptions** deliver to a callback or to an unbounded Tokio
//!   channel.  They are added with [`NotificationHub::connect`],
//!   [`NotificationHub::connect_any`] or [`NotificationHub::subscribe`] and
//!   removed with [`NotificationHub::disconnect`].
//!
//! - **Relays** forward one notification kind to another hub, which then
//!   delivers it to its own subscribers.  A relay is unique per
//!   (kind, destination): registering the same relay twice keeps one.  This is
//!   what makes mirroring between two facades idempotent.
//!
//! Relays hold the destination weakly.  A hub that has been dropped is pruned
//! from the relay list the next time its source emits.
//!
//! # Cycles
//!
//! Two facades mirrored onto each other relay in both directions.  Every
//! emission carries the set of hubs it has already visited and a hub never
//! delivers the same emission twice, so a notification reaches each hub (and
//! each subscriber) exactly once however the relays are wired.
//!
//! # Locking
//!
//! The subscription list is snapshotted under the lock and the lock released
//! before any callback runs.  Callbacks may therefore subscribe, disconnect or
//! emit on the same hub without deadlocking.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use dbshell_core::protocol::messages::{
    BackupRequest, BackupResponse, ChangePropertyRequest, ChangePropertyResponse,
    ConnectRequest, ConnectResponse, DisconnectRequest, DisconnectResponse, ExecuteRequest,
    ExecuteResponse, ExportRequest, ExportResponse, LoadDatabaseContentRequest,
    LoadDatabaseContentResponse, LoadDatabasesRequest, LoadDatabasesResponse, RootCompleted,
    RootCreated, ServerHistoryRequest, ServerHistoryResponse, ServerInfoRequest,
    ServerInfoResponse, ServerPropertyRequest, ServerPropertyResponse, ShutdownRequest,
};
use dbshell_core::{CommandMode, ItemUpdate, TreeItem};
use tokio::sync::mpsc;
use tracing::trace;

// ── Notification values ───────────────────────────────────────────────────────

/// A signal observable on a facade or driver.
///
/// "Started" notifications carry the request about to be posted; "finished"
/// notifications carry the full response, including any attached error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StartedConnect(ConnectRequest),
    FinishedConnect(ConnectResponse),
    StartedDisconnect(DisconnectRequest),
    FinishedDisconnect(DisconnectResponse),
    StartedExecute(ExecuteRequest),
    FinishedExecute(ExecuteResponse),
    /// Shutdown has no matching "finished": the backend goes away.
    StartedShutdown(ShutdownRequest),
    StartedBackup(BackupRequest),
    FinishedBackup(BackupResponse),
    StartedExport(ExportRequest),
    FinishedExport(ExportResponse),
    StartedLoadDatabases(LoadDatabasesRequest),
    FinishedLoadDatabases(LoadDatabasesResponse),
    StartedLoadDatabaseContent(LoadDatabaseContentRequest),
    FinishedLoadDatabaseContent(LoadDatabaseContentResponse),
    StartedServerInfo(ServerInfoRequest),
    FinishedServerInfo(ServerInfoResponse),
    StartedServerProperty(ServerPropertyRequest),
    FinishedServerProperty(ServerPropertyResponse),
    StartedChangeProperty(ChangePropertyRequest),
    FinishedChangeProperty(ChangePropertyResponse),
    StartedServerHistory(ServerHistoryRequest),
    FinishedServerHistory(ServerHistoryResponse),
    RootCreated(RootCreated),
    RootCompleted(RootCompleted),
    ChildAdded(TreeItem),
    ItemUpdated(ItemUpdate),
    EnteredMode(CommandMode),
    LeftMode(CommandMode),
    /// Percentage (0–100) of the current operation.
    Progress(u8),
}

/// Payload-free tag of a [`Notification`], used to pick what to subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    StartedConnect,
    FinishedConnect,
    StartedDisconnect,
    FinishedDisconnect,
    StartedExecute,
    FinishedExecute,
    StartedShutdown,
    StartedBackup,
    FinishedBackup,
    StartedExport,
    FinishedExport,
    StartedLoadDatabases,
    FinishedLoadDatabases,
    StartedLoadDatabaseContent,
    FinishedLoadDatabaseContent,
    StartedServerInfo,
    FinishedServerInfo,
    StartedServerProperty,
    FinishedServerProperty,
    StartedChangeProperty,
    FinishedChangeProperty,
    StartedServerHistory,
    FinishedServerHistory,
    RootCreated,
    RootCompleted,
    ChildAdded,
    ItemUpdated,
    EnteredMode,
    LeftMode,
    Progress,
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        use NotificationKind as K;
        match self {
            Notification::StartedConnect(_) => K::StartedConnect,
            Notification::FinishedConnect(_) => K::FinishedConnect,
            Notification::StartedDisconnect(_) => K::StartedDisconnect,
            Notification::FinishedDisconnect(_) => K::FinishedDisconnect,
            Notification::StartedExecute(_) => K::StartedExecute,
            Notification::FinishedExecute(_) => K::FinishedExecute,
            Notification::StartedShutdown(_) => K::StartedShutdown,
            Notification::StartedBackup(_) => K::StartedBackup,
            Notification::FinishedBackup(_) => K::FinishedBackup,
            Notification::StartedExport(_) => K::StartedExport,
            Notification::FinishedExport(_) => K::FinishedExport,
            Notification::StartedLoadDatabases(_) => K::StartedLoadDatabases,
            Notification::FinishedLoadDatabases(_) => K::FinishedLoadDatabases,
            Notification::StartedLoadDatabaseContent(_) => K::StartedLoadDatabaseContent,
            Notification::FinishedLoadDatabaseContent(_) => K::FinishedLoadDatabaseContent,
            Notification::StartedServerInfo(_) => K::StartedServerInfo,
            Notification::FinishedServerInfo(_) => K::FinishedServerInfo,
            Notification::StartedServerProperty(_) => K::StartedServerProperty,
            Notification::FinishedServerProperty(_) => K::FinishedServerProperty,
            Notification::StartedChangeProperty(_) => K::StartedChangeProperty,
            Notification::FinishedChangeProperty(_) => K::FinishedChangeProperty,
            Notification::StartedServerHistory(_) => K::StartedServerHistory,
            Notification::FinishedServerHistory(_) => K::FinishedServerHistory,
            Notification::RootCreated(_) => K::RootCreated,
            Notification::RootCompleted(_) => K::RootCompleted,
            Notification::ChildAdded(_) => K::ChildAdded,
            Notification::ItemUpdated(_) => K::ItemUpdated,
            Notification::EnteredMode(_) => K::EnteredMode,
            Notification::LeftMode(_) => K::LeftMode,
            Notification::Progress(_) => K::Progress,
        }
    }
}

// ── Hub ───────────────────────────────────────────────────────────────────────

/// Handle returned by a direct subscription, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Clone)]
enum Target {
    Callback(Callback),
    Channel(mpsc::UnboundedSender<Notification>),
    Relay(Weak<HubInner>),
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    /// `None` matches every kind.
    kind: Option<NotificationKind>,
    target: Target,
}

impl Subscription {
    fn matches(&self, kind: NotificationKind) -> bool {
        self.kind.map_or(true, |k| k == kind)
    }

    fn is_relay_to(&self, kind: NotificationKind, dst: &Arc<HubInner>) -> bool {
        match &self.target {
            Target::Relay(weak) => {
                self.kind == Some(kind) && std::ptr::eq(weak.as_ptr(), Arc::as_ptr(dst))
            }
            _ => false,
        }
    }

    fn is_alive(&self) -> bool {
        match &self.target {
            Target::Callback(_) => true,
            Target::Channel(tx) => !tx.is_closed(),
            Target::Relay(weak) => weak.strong_count() > 0,
        }
    }
}

/// Hub identities, unique per process.
static NEXT_HUB_ID: AtomicU64 = AtomicU64::new(1);

struct HubInner {
    id: u64,
    next_subscription: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(self: &Arc<Self>, notification: &Notification, visited: &mut HashSet<u64>) {
        if !visited.insert(self.id) {
            return;
        }

        let kind = notification.kind();
        let targets: Vec<Target> = self
            .lock()
            .iter()
            .filter(|s| s.matches(kind))
            .map(|s| s.target.clone())
            .collect();

        let mut stale = false;
        for target in targets {
            match target {
                Target::Callback(callback) => callback(notification),
                Target::Channel(tx) => {
                    if tx.send(notification.clone()).is_err() {
                        stale = true;
                    }
                }
                Target::Relay(weak) => match weak.upgrade() {
                    Some(dst) => dst.deliver(notification, visited),
                    None => stale = true,
                },
            }
        }

        if stale {
            let mut subs = self.lock();
            let before = subs.len();
            subs.retain(Subscription::is_alive);
            trace!(hub = self.id, pruned = before - subs.len(), "pruned stale subscriptions");
        }
    }
}

/// Ordered multi-subscriber notification registry.
///
/// Cloning is cheap and yields another handle to the same hub.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("id", &self.inner.id)
            .field("subscriptions", &self.inner.lock().len())
            .finish()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                id: NEXT_HUB_ID.fetch_add(1, Ordering::Relaxed),
                next_subscription: AtomicU64::new(1),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Process-unique identity of this hub.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns `true` if both handles refer to the same hub.
    pub fn ptr_eq(&self, other: &NotificationHub) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a handle that does not keep this hub alive.
    pub fn downgrade(&self) -> WeakNotificationHub {
        WeakNotificationHub {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Calls `callback` for every notification of `kind`.
    pub fn connect<F>(&self, kind: NotificationKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.push(Some(kind), Target::Callback(Arc::new(callback)))
    }

    /// Calls `callback` for every notification.
    pub fn connect_any<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.push(None, Target::Callback(Arc::new(callback)))
    }

    /// Returns a receiver that gets a copy of every notification.
    ///
    /// Dropping the receiver ends the subscription.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(None, Target::Channel(tx));
        rx
    }

    /// Removes a direct subscription.  Returns `false` if it was not present.
    pub fn disconnect(&self, id: SubscriptionId) -> bool {
        let mut subs = self.inner.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Forwards notifications of `kind` to `dst`.
    ///
    /// Returns `false` without changing anything when the relay already
    /// exists or when `dst` is this hub.
    pub fn connect_relay(&self, kind: NotificationKind, dst: &NotificationHub) -> bool {
        if self.ptr_eq(dst) {
            return false;
        }
        let mut subs = self.inner.lock();
        if subs.iter().any(|s| s.is_relay_to(kind, &dst.inner)) {
            return false;
        }
        let id = self.next_id();
        subs.push(Subscription {
            id,
            kind: Some(kind),
            target: Target::Relay(Arc::downgrade(&dst.inner)),
        });
        true
    }

    /// Removes the relay of `kind` to `dst`.  Returns `false` if it was not
    /// present.  Direct subscriptions are never touched.
    pub fn disconnect_relay(&self, kind: NotificationKind, dst: &NotificationHub) -> bool {
        let mut subs = self.inner.lock();
        let before = subs.len();
        subs.retain(|s| !s.is_relay_to(kind, &dst.inner));
        subs.len() != before
    }

    pub fn has_relay(&self, kind: NotificationKind, dst: &NotificationHub) -> bool {
        self.inner
            .lock()
            .iter()
            .any(|s| s.is_relay_to(kind, &dst.inner))
    }

    /// Removes every relay this hub forwards through.
    pub fn clear_relays(&self) {
        self.inner
            .lock()
            .retain(|s| !matches!(s.target, Target::Relay(_)));
    }

    /// Number of live relays this hub forwards through.
    pub fn relay_count(&self) -> usize {
        self.inner
            .lock()
            .iter()
            .filter(|s| matches!(&s.target, Target::Relay(w) if w.strong_count() > 0))
            .count()
    }

    /// Number of direct (callback or channel) subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .iter()
            .filter(|s| !matches!(s.target, Target::Relay(_)))
            .count()
    }

    /// Delivers `notification` to every matching subscriber and relay, in
    /// registration order.
    pub fn emit(&self, notification: Notification) {
        let mut visited = HashSet::new();
        self.inner.deliver(&notification, &mut visited);
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed))
    }

    fn push(&self, kind: Option<NotificationKind>, target: Target) -> SubscriptionId {
        let id = self.next_id();
        self.inner.lock().push(Subscription { id, kind, target });
        id
    }
}

/// Non-owning handle to a [`NotificationHub`].
#[derive(Clone)]
pub struct WeakNotificationHub {
    inner: Weak<HubInner>,
}

impl WeakNotificationHub {
    pub fn upgrade(&self) -> Option<NotificationHub> {
        self.inner.upgrade().map(|inner| NotificationHub { inner })
    }

    /// Returns `true` if this handle was downgraded from `hub`.
    pub fn refers_to(&self, hub: &NotificationHub) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&hub.inner))
    }
}

impl std::fmt::Debug for WeakNotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakNotificationHub")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Subscribes a recorder that collects every notification the hub emits.
    fn record(hub: &NotificationHub) -> Arc<Mutex<Vec<Notification>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hub.connect_any(move |n| sink.lock().unwrap().push(n.clone()));
        seen
    }

    fn execute(command: &str) -> Notification {
        Notification::StartedExecute(ExecuteRequest {
            command: command.to_string(),
        })
    }

    #[test]
    fn test_kind_filtered_callback_only_sees_its_kind() {
        // Arrange
        let hub = NotificationHub::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        hub.connect(NotificationKind::Progress, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        // Act
        hub.emit(Notification::Progress(0));
        hub.emit(execute("PING"));
        hub.emit(Notification::Progress(100));

        // Assert
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscribers_are_called_in_registration_order() {
        let hub = NotificationHub::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            hub.connect_any(move |_| order.lock().unwrap().push(tag));
        }

        hub.emit(Notification::Progress(1));

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_disconnect_removes_only_that_subscription() {
        let hub = NotificationHub::new();
        let kept = record(&hub);
        let removed = hub.connect_any(|_| panic!("must not be called"));

        assert!(hub.disconnect(removed));
        assert!(!hub.disconnect(removed));
        hub.emit(Notification::Progress(5));

        assert_eq!(kept.lock().unwrap().len(), 1);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_channel_subscription_receives_copies() {
        let hub = NotificationHub::new();
        let mut rx = hub.subscribe();

        hub.emit(execute("GET a"));

        assert_eq!(rx.try_recv().expect("one notification"), execute("GET a"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_channel_is_pruned_on_next_emit() {
        let hub = NotificationHub::new();
        drop(hub.subscribe());
        assert_eq!(hub.subscriber_count(), 1);

        hub.emit(Notification::Progress(0));

        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_relay_forwards_only_its_kind() {
        // Arrange
        let src = NotificationHub::new();
        let dst = NotificationHub::new();
        let seen = record(&dst);
        assert!(src.connect_relay(NotificationKind::StartedExecute, &dst));

        // Act
        src.emit(execute("PING"));
        src.emit(Notification::Progress(0));

        // Assert
        assert_eq!(*seen.lock().unwrap(), vec![execute("PING")]);
    }

    #[test]
    fn test_connect_relay_twice_keeps_one_relay() {
        let src = NotificationHub::new();
        let dst = NotificationHub::new();
        let seen = record(&dst);

        assert!(src.connect_relay(NotificationKind::ChildAdded, &dst));
        assert!(!src.connect_relay(NotificationKind::ChildAdded, &dst));
        src.emit(Notification::ChildAdded(TreeItem::child(2, 1, "v")));

        assert_eq!(src.relay_count(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_relay_to_self_is_refused() {
        let hub = NotificationHub::new();
        assert!(!hub.connect_relay(NotificationKind::Progress, &hub.clone()));
        assert_eq!(hub.relay_count(), 0);
    }

    #[test]
    fn test_two_way_relay_delivers_once_per_hub() {
        // Arrange: a <-> b, each with one recorder
        let a = NotificationHub::new();
        let b = NotificationHub::new();
        let seen_a = record(&a);
        let seen_b = record(&b);
        a.connect_relay(NotificationKind::StartedExecute, &b);
        b.connect_relay(NotificationKind::StartedExecute, &a);

        // Act
        a.emit(execute("PING"));
        b.emit(execute("INFO"));

        // Assert
        assert_eq!(*seen_a.lock().unwrap(), vec![execute("PING"), execute("INFO")]);
        assert_eq!(*seen_b.lock().unwrap(), vec![execute("PING"), execute("INFO")]);
    }

    #[test]
    fn test_disconnect_relay_leaves_direct_subscriptions() {
        let src = NotificationHub::new();
        let dst = NotificationHub::new();
        let _direct = record(&src);
        src.connect_relay(NotificationKind::StartedExecute, &dst);

        assert!(src.disconnect_relay(NotificationKind::StartedExecute, &dst));
        assert!(!src.disconnect_relay(NotificationKind::StartedExecute, &dst));

        assert_eq!(src.relay_count(), 0);
        assert_eq!(src.subscriber_count(), 1);
    }

    #[test]
    fn test_relay_to_dropped_hub_is_pruned() {
        let src = NotificationHub::new();
        {
            let dst = NotificationHub::new();
            src.connect_relay(NotificationKind::Progress, &dst);
        }
        assert_eq!(src.relay_count(), 0);

        src.emit(Notification::Progress(10));

        assert!(src.inner.lock().is_empty());
    }

    #[test]
    fn test_weak_handle_does_not_keep_hub_alive() {
        let hub = NotificationHub::new();
        let weak = hub.downgrade();
        assert!(weak.refers_to(&hub));
        assert!(weak.upgrade().is_some_and(|h| h.ptr_eq(&hub)));

        drop(hub);

        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let hub = NotificationHub::new();
        let inner = hub.clone();
        hub.connect(NotificationKind::Progress, move |_| {
            inner.connect_any(|_| {});
        });

        hub.emit(Notification::Progress(0));

        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn test_notification_kind_matches_variant() {
        assert_eq!(execute("x").kind(), NotificationKind::StartedExecute);
        assert_eq!(
            Notification::LeftMode(CommandMode::PubSub).kind(),
            NotificationKind::LeftMode
        );
    }
}

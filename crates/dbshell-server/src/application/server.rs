//! Server facade: the client-facing object for one logical connection.
//!
//! A [`Server`] never talks to the database.  Each operation method builds a
//! request, announces it, posts it to the driver thread and returns
//! immediately.  Answers come back asynchronously on the server's inbox and
//! are turned into notifications by [`Server::handle_event`].
//!
//! # Lifecycle
//!
//! 1. [`Server::new`] creates the facade and attaches its inbox to the
//!    driver channel.
//! 2. [`Server::start`] spawns the router task draining that inbox and, for a
//!    master server, relays the driver's tree notifications.
//! 3. [`Server::close`] (or dropping the last `Arc`) undoes the master relay
//!    and every sync with other servers, then detaches the inbox; the router
//!    task finishes the events already queued and ends.
//!
//! A master's relay does not emit on the server's hub directly.  It queues
//! the driver's child-added and item-updated notifications on the server's
//! inbox, behind whatever the driver posted before them, so subscribers see
//! one ordered stream and are only ever called from the router task.
//!
//! # Request flow
//!
//! ```text
//! execute("PING")
//!  ├─ emit Progress(0)
//!  ├─ emit StartedExecute("PING")        (subscribers see it here)
//!  └─ post Request::Execute ──► driver thread
//!                                   │
//! router task ◄── inbox ◄───────────┘
//!  └─ handle_event ─► emit FinishedExecute(...)
//! ```
//!
//! Failures are data: a response carrying an [`ErrorValue`] is logged and
//! still emitted as "finished".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dbshell_core::domain::{DatabaseInfo, PropertyType};
use dbshell_core::protocol::messages::{
    BackupRequest, ChangePropertyRequest, ConnectRequest, DisconnectRequest, ExecuteRequest,
    ExportRequest, LoadDatabaseContentRequest, LoadDatabasesRequest, ProcessConfigArgsRequest,
    ServerHistoryRequest, ServerInfoRequest, ServerPropertyRequest, ShutdownRequest,
};
use dbshell_core::protocol::RequestSequence;
use dbshell_core::{
    ConnectionType, ErrorValue, Event, EventKind, HostAndPort, Request, Response, ResponseEvent,
    ServerId,
};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::application::driver::Driver;
use crate::application::notifications::{
    Notification, NotificationHub, NotificationKind, SubscriptionId, WeakNotificationHub,
};
use crate::application::sync_bridge::unsync_all;
use crate::infrastructure::channel::DriverHandle;

/// Driver notifications a master server re-emits as its own.
const MASTER_RELAYED: [NotificationKind; 2] =
    [NotificationKind::ChildAdded, NotificationKind::ItemUpdated];

/// Outcome of routing one response event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The event was turned into a notification.
    Handled,
    /// The event kind has no handler and was only logged.
    Unhandled,
}

/// Client-facing facade over a shared [`Driver`].
pub struct Server {
    id: ServerId,
    channel: DriverHandle,
    hub: NotificationHub,
    ids: RequestSequence,
    is_master: AtomicBool,
    started: AtomicBool,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<ResponseEvent>>>,
    /// Subscriptions on the driver hub while acting as master.
    master_relay: Mutex<Vec<SubscriptionId>>,
    /// Hubs this server is synced with.
    peers: Mutex<Vec<WeakNotificationHub>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("is_master", &self.is_master())
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}

impl Server {
    /// Creates a facade over the driver behind `channel` and attaches its
    /// inbox.  Nothing is routed until [`Server::start`] is called.
    pub fn new(channel: DriverHandle, is_master: bool) -> Arc<Self> {
        let id = Uuid::new_v4();
        let inbox = channel.attach(id);
        debug!(server = %id, is_master, "server created");
        Arc::new(Self {
            id,
            channel,
            hub: NotificationHub::new(),
            ids: RequestSequence::new(),
            is_master: AtomicBool::new(is_master),
            started: AtomicBool::new(false),
            inbox: Mutex::new(Some(inbox)),
            master_relay: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the router task and, for a master, relays the driver's
    /// child-added and item-updated notifications.
    ///
    /// Must be called from within a Tokio runtime.  Calling it again is a
    /// no-op.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(server = %self.id, "server already started");
            return;
        }
        if self.is_master() {
            self.install_master_relay();
        }

        let inbox = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut inbox) = inbox else {
            return;
        };

        // The task holds the server weakly so dropping the last handle still
        // detaches the inbox and ends the loop.
        let weak = Arc::downgrade(self);
        let id = self.id;
        tokio::spawn(async move {
            while let Some(event) = inbox.recv().await {
                let Some(server) = weak.upgrade() else {
                    break;
                };
                server.handle_event(event);
            }
            debug!(server = %id, "router task stopped");
        });
    }

    /// Detaches the server from its driver and removes every relay it takes
    /// part in: the master relay, the mirroring with synced servers in both
    /// directions and any other relay leaving its hub.
    pub fn close(&self) {
        self.remove_master_relay();
        let unsynced = unsync_all(self);
        self.hub.clear_relays();
        if self.channel.detach(self.id) {
            debug!(server = %self.id, unsynced, "server closed");
        }
    }

    // ── Operations ───────────────────────────────────────────────────────────

    pub fn connect(&self) {
        let req = ConnectRequest;
        self.notify(
            Some(Notification::StartedConnect(req.clone())),
            Request::Connect(req),
        );
    }

    pub fn disconnect(&self) {
        let req = DisconnectRequest;
        self.notify(
            Some(Notification::StartedDisconnect(req.clone())),
            Request::Disconnect(req),
        );
    }

    /// Runs `command` verbatim on the backend.
    pub fn execute(&self, command: impl Into<String>) {
        let req = ExecuteRequest {
            command: command.into(),
        };
        self.notify(
            Some(Notification::StartedExecute(req.clone())),
            Request::Execute(req),
        );
    }

    /// Asks the backend server process to shut down.
    pub fn shut_down(&self) {
        let req = ShutdownRequest;
        self.notify(
            Some(Notification::StartedShutdown(req.clone())),
            Request::Shutdown(req),
        );
    }

    pub fn backup_to_path(&self, path: impl Into<String>) {
        let req = BackupRequest { path: path.into() };
        self.notify(
            Some(Notification::StartedBackup(req.clone())),
            Request::Backup(req),
        );
    }

    pub fn export_from_path(&self, path: impl Into<String>) {
        let req = ExportRequest { path: path.into() };
        self.notify(
            Some(Notification::StartedExport(req.clone())),
            Request::Export(req),
        );
    }

    pub fn load_databases(&self) {
        let req = LoadDatabasesRequest;
        self.notify(
            Some(Notification::StartedLoadDatabases(req.clone())),
            Request::LoadDatabases(req),
        );
    }

    pub fn load_database_content(&self, database: DatabaseInfo) {
        let req = LoadDatabaseContentRequest { database };
        self.notify(
            Some(Notification::StartedLoadDatabaseContent(req.clone())),
            Request::LoadDatabaseContent(req),
        );
    }

    pub fn fetch_server_info(&self) {
        let req = ServerInfoRequest;
        self.notify(
            Some(Notification::StartedServerInfo(req.clone())),
            Request::ServerInfo(req),
        );
    }

    pub fn fetch_server_property(&self) {
        let req = ServerPropertyRequest;
        self.notify(
            Some(Notification::StartedServerProperty(req.clone())),
            Request::ServerProperty(req),
        );
    }

    pub fn change_property(&self, new_item: PropertyType) {
        let req = ChangePropertyRequest { new_item };
        self.notify(
            Some(Notification::StartedChangeProperty(req.clone())),
            Request::ChangeProperty(req),
        );
    }

    pub fn request_history_info(&self) {
        let req = ServerHistoryRequest;
        self.notify(
            Some(Notification::StartedServerHistory(req.clone())),
            Request::ServerHistory(req),
        );
    }

    /// Has the driver apply the connection's extra command-line arguments.
    ///
    /// Sent automatically after every successful connect; no "started"
    /// notification precedes it.
    pub fn process_config_args(&self) {
        self.notify(None, Request::ProcessConfigArgs(ProcessConfigArgsRequest));
    }

    /// Asks the driver to interrupt whatever it is running.  Best effort.
    pub fn stop_current_event(&self) {
        debug!(server = %self.id, "interrupt requested");
        self.driver().interrupt();
    }

    /// Emits progress and the optional "started" notification, then posts
    /// the request.  Never blocks on the driver.
    fn notify(&self, started: Option<Notification>, request: Request) {
        self.hub.emit(Notification::Progress(0));
        if let Some(notification) = started {
            self.hub.emit(notification);
        }

        let event = Event::new(self.id, self.ids.next_id(), request);
        let kind = event.kind();
        let correlation = event.correlation;
        match self.channel.post(event) {
            Ok(()) => trace!(server = %self.id, ?kind, correlation, "request posted"),
            Err(e) => error!(server = %self.id, ?kind, "failed to post request: {e}"),
        }
    }

    // ── Routing ──────────────────────────────────────────────────────────────

    /// Turns one response event into the matching notification.
    ///
    /// Called by the router task in arrival order; public so out-of-process
    /// hosts and tests can route events themselves.
    pub fn handle_event(&self, event: ResponseEvent) -> Dispatch {
        let kind = event.kind();
        let correlation = event.correlation;
        if let Some(err) = event.payload.error_info() {
            log_error_value(self.id, kind, correlation, err);
        }

        let notification = match event.into_payload() {
            Response::Connect(r) => {
                let connected = r.error.is_none();
                self.hub.emit(Notification::FinishedConnect(r));
                if connected {
                    self.process_config_args();
                }
                return Dispatch::Handled;
            }
            Response::Disconnect(r) => Notification::FinishedDisconnect(r),
            Response::Execute(r) => Notification::FinishedExecute(r),
            Response::Backup(r) => Notification::FinishedBackup(r),
            Response::Export(r) => Notification::FinishedExport(r),
            Response::LoadDatabases(r) => Notification::FinishedLoadDatabases(r),
            Response::LoadDatabaseContent(r) => Notification::FinishedLoadDatabaseContent(r),
            Response::ServerInfo(r) => Notification::FinishedServerInfo(r),
            Response::ServerProperty(r) => Notification::FinishedServerProperty(r),
            Response::ChangeProperty(r) => Notification::FinishedChangeProperty(r),
            Response::ServerHistory(r) => Notification::FinishedServerHistory(r),
            Response::RootCreated(v) => Notification::RootCreated(v),
            Response::RootCompleted(v) => Notification::RootCompleted(v),
            Response::ChildAdded(item) => Notification::ChildAdded(item),
            Response::ItemUpdated(update) => Notification::ItemUpdated(update),
            Response::EnterMode(mode) => Notification::EnteredMode(mode),
            Response::LeaveMode(mode) => Notification::LeftMode(mode),
            Response::Progress(percent) => Notification::Progress(percent),
            Response::Shutdown(_) | Response::ProcessConfigArgs(_) => {
                trace!(server = %self.id, ?kind, correlation, "no handler for response");
                return Dispatch::Unhandled;
            }
        };
        self.hub.emit(notification);
        Dispatch::Handled
    }

    // ── Master role ──────────────────────────────────────────────────────────

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::SeqCst)
    }

    /// Changes the master role.  On a started server the driver relay is
    /// installed or removed immediately.
    pub fn set_is_master(&self, is_master: bool) {
        let was = self.is_master.swap(is_master, Ordering::SeqCst);
        if was == is_master || !self.started.load(Ordering::SeqCst) {
            return;
        }
        if is_master {
            self.install_master_relay();
        } else {
            self.remove_master_relay();
        }
    }

    fn install_master_relay(&self) {
        let mut relay = self
            .master_relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !relay.is_empty() {
            return;
        }
        let source = self.driver().notifications();
        for kind in MASTER_RELAYED {
            let inlet = self.channel.inlet(self.id);
            let server = self.id;
            relay.push(source.connect(kind, move |notification| {
                let response = match notification {
                    Notification::ChildAdded(item) => Response::ChildAdded(item.clone()),
                    Notification::ItemUpdated(update) => Response::ItemUpdated(update.clone()),
                    _ => return,
                };
                if !inlet.send(response) {
                    trace!(%server, "server detached, driver notification dropped");
                }
            }));
        }
    }

    fn remove_master_relay(&self) {
        let relay = std::mem::take(
            &mut *self
                .master_relay
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if relay.is_empty() {
            return;
        }
        let source = self.driver().notifications();
        for id in relay {
            source.disconnect(id);
        }
    }

    // ── Sync peers ───────────────────────────────────────────────────────────

    pub(crate) fn add_peer(&self, peer: &NotificationHub) {
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        peers.retain(|p| p.upgrade().is_some());
        if !peers.iter().any(|p| p.refers_to(peer)) {
            peers.push(peer.downgrade());
        }
    }

    pub(crate) fn remove_peer(&self, peer: &NotificationHub) {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|p| !p.refers_to(peer));
    }

    pub(crate) fn take_peers(&self) -> Vec<WeakNotificationHub> {
        std::mem::take(&mut *self.peers.lock().unwrap_or_else(PoisonError::into_inner))
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn id(&self) -> ServerId {
        self.id
    }

    /// Hub on which this server emits its notifications.
    pub fn notifications(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        self.channel.driver()
    }

    pub fn name(&self) -> String {
        self.driver().settings().connection_name
    }

    pub fn address(&self) -> HostAndPort {
        self.driver().settings().host
    }

    pub fn output_delimiter(&self) -> String {
        self.driver().settings().output_delimiter
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.driver().connection_type()
    }

    pub fn is_connected(&self) -> bool {
        self.driver().is_connected()
    }

    pub fn is_local_host(&self) -> bool {
        self.address().is_local_host()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

fn log_error_value(server: ServerId, kind: EventKind, correlation: u64, err: &ErrorValue) {
    if err.is_error() {
        error!(%server, ?kind, correlation, "{}", err.message());
    } else {
        warn!(%server, ?kind, correlation, "{}", err.message());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

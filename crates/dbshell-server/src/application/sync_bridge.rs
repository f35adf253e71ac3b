//! Mirroring of notifications between two server facades.
//!
//! A console can show the same connection in more than one place, e.g. a
//! primary view and a secondary one.  [`sync_servers`] makes both facades
//! behave as one: a command started on either is reported on both, and the
//! result tree it produces is visible on both.
//!
//! Only a fixed set of kinds is mirrored (see [`MIRRORED_KINDS`]).  Database
//! browsing, properties and history stay local to the facade that asked.
//!
//! Registration is idempotent and exactly invertible: syncing twice is the
//! same as syncing once, and [`unsync_servers`] removes exactly the relays
//! [`sync_servers`] installed, leaving direct subscriptions alone.
//!
//! Each server remembers (weakly) the hubs it was synced with, so
//! [`Server::close`] can undo the mirroring in both directions without the
//! caller naming the peers.

use tracing::debug;

use crate::application::notifications::{
    NotificationHub, NotificationKind, WeakNotificationHub,
};
use crate::application::server::Server;

/// Notification kinds forwarded in both directions between synced servers.
pub const MIRRORED_KINDS: [NotificationKind; 10] = [
    NotificationKind::StartedConnect,
    NotificationKind::FinishedConnect,
    NotificationKind::StartedDisconnect,
    NotificationKind::FinishedDisconnect,
    NotificationKind::StartedExecute,
    NotificationKind::FinishedExecute,
    NotificationKind::RootCreated,
    NotificationKind::RootCompleted,
    NotificationKind::ChildAdded,
    NotificationKind::ItemUpdated,
];

/// Mirrors the [`MIRRORED_KINDS`] of `a` onto `b` and of `b` onto `a`.
///
/// Symmetric and idempotent.  Syncing a server with itself does nothing.
pub fn sync_servers(a: &Server, b: &Server) {
    let (ha, hb) = (a.notifications(), b.notifications());
    if ha.ptr_eq(hb) {
        return;
    }
    a.add_peer(hb);
    b.add_peer(ha);
    let added = relay_all(ha, hb) + relay_all(hb, ha);
    debug!(a = %a.id(), b = %b.id(), added, "servers synced");
}

/// Removes the mirroring installed by [`sync_servers`].
///
/// Symmetric.  Subscriptions added directly on either hub are kept.
pub fn unsync_servers(a: &Server, b: &Server) {
    let (ha, hb) = (a.notifications(), b.notifications());
    a.remove_peer(hb);
    b.remove_peer(ha);
    let removed = unrelay_all(ha, hb) + unrelay_all(hb, ha);
    debug!(a = %a.id(), b = %b.id(), removed, "servers unsynced");
}

/// Removes the mirroring between `server` and every peer it was synced with.
pub(crate) fn unsync_all(server: &Server) -> usize {
    let hub = server.notifications();
    server
        .take_peers()
        .iter()
        .filter_map(WeakNotificationHub::upgrade)
        .map(|peer| unrelay_all(&peer, hub) + unrelay_all(hub, &peer))
        .sum()
}

fn relay_all(src: &NotificationHub, dst: &NotificationHub) -> usize {
    MIRRORED_KINDS
        .iter()
        .filter(|kind| src.connect_relay(**kind, dst))
        .count()
}

fn unrelay_all(src: &NotificationHub, dst: &NotificationHub) -> usize {
    MIRRORED_KINDS
        .iter()
        .filter(|kind| src.disconnect_relay(**kind, dst))
        .count()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

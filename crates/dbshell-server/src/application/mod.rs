//! Application layer: the server facade and everything it orchestrates.
//!
//! # What lives here? (for beginners)
//!
//! This layer holds the rules of the dispatch protocol without knowing how a
//! database is actually reached.  It depends on the [`driver::Driver`] trait,
//! never on a concrete driver, so every use case can be unit-tested with a
//! mock.
//!
//! # Sub-modules
//!
//! - **`driver`** – The `Driver` trait a backend implements, and the `Outbox`
//!   it answers through.
//!
//! - **`notifications`** – `Notification` values and the `NotificationHub`
//!   observer registry, including idempotent relays between hubs.
//!
//! - **`server`** – The `Server` facade: one method per operation, plus the
//!   router turning responses into notifications.
//!
//! - **`sync_bridge`** – Mirrors a fixed set of notifications between two
//!   servers, and undoes it.

pub mod driver;
pub mod notifications;
pub mod server;
pub mod sync_bridge;

//! # dbshell-core
//!
//! Shared library for dbshell containing the event protocol exchanged between
//! server facades and drivers, the error payload carried by responses, and the
//! connection domain types.
//!
//! This crate has no dependencies on async runtimes, threads, or sockets.
//!
//! # Architecture overview (for beginners)
//!
//! dbshell is a database console.  The user talks to a **server facade**; the
//! facade never touches the database itself.  Instead it sends typed
//! **request events** to a **driver** that runs in its own execution context,
//! and later receives **response events** describing what happened.
//!
//! This crate (`dbshell-core`) is the vocabulary both sides share:
//!
//! - **`protocol`** – The request/response events, their kind tags, the
//!   per-server request sequence, and a binary envelope codec used when the
//!   driver lives in another process.
//!
//! - **`domain`** – Connection settings (name, address, output delimiter),
//!   database descriptors, server properties and the result-tree items a
//!   driver produces while executing a command.
//!
//! - **`error`** – [`ErrorValue`], the failure description a driver attaches
//!   to a response.  Failures travel as data, never as panics.

pub mod domain;
pub mod error;
pub mod protocol;

pub use domain::settings::{ConnectionSettings, ConnectionType, HostAndPort};
pub use domain::tree::{CommandMode, ItemUpdate, TreeItem};
pub use error::ErrorValue;
pub use protocol::codec::{decode_event, encode_event, ProtocolError};
pub use protocol::messages::{
    Event, EventKind, EventRole, Request, RequestEvent, Response, ResponseEvent, ServerId,
};

//! dbshell server library.
//!
//! Exposes the server facade, the driver channel and the bundled drivers so
//! the binary and integration tests can assemble them.
//!
//! # Architecture
//!
//! ```text
//! Server (facade) ──Request──► driver thread ──► Driver::handle_request
//!       ▲                                              │
//!       └── router task ◄──── per-server route ◄──Response
//! ```
//!
//! - **`application`** – `Server`, `Driver`, notifications and server sync.
//! - **`infrastructure`** – the driver channel, concrete drivers and config
//!   file storage.

pub mod application;
pub mod infrastructure;

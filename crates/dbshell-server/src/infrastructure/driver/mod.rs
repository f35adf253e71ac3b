//! Concrete [`Driver`](crate::application::driver::Driver) implementations.
//!
//! - **`memory`** – A self-contained key/value backend kept in process memory.
//!   It speaks a small Redis-like command set and produces the same progress,
//!   result-tree and mode events a network driver would.
//!
//! - **`mock`** – A scripted driver that records requests and replays canned
//!   responses, for tests.

pub mod memory;
pub mod mock;

pub use memory::MemoryDriver;
pub use mock::ScriptedDriver;

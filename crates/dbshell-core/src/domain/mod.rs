//! Domain entities for dbshell.
//!
//! Pure data types with no infrastructure dependencies.  Everything in here is
//! an immutable value that can be copied into an event and moved across the
//! boundary between a server facade and its driver.

/// Connection identity: name, address, type and output delimiter.
pub mod settings;

/// Result-tree nodes and command modes produced while a command runs.
pub mod tree;

use serde::{Deserialize, Serialize};

/// Descriptor of one logical database on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub key_count: u64,
    /// The database a fresh connection starts in.
    pub is_default: bool,
}

impl DatabaseInfo {
    pub fn new(name: impl Into<String>, key_count: u64, is_default: bool) -> Self {
        Self {
            name: name.into(),
            key_count,
            is_default,
        }
    }
}

/// A single server property (`key = value`), as read or written through
/// the property requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyType {
    pub key: String,
    pub value: String,
}

impl PropertyType {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One sample of server statistics, as returned by a history request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Milliseconds since Unix epoch at which the sample was taken.
    pub timestamp_ms: u64,
    pub fields: std::collections::BTreeMap<String, String>,
}

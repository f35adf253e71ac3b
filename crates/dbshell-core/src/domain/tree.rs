//! Result-tree values produced while a driver executes a command.
//!
//! Executing a command builds a small tree: a root for the command, then one
//! child per returned value.  Drivers announce the tree incrementally
//! (root created, child added, item updated, root completed) so a view can
//! render results while the command is still running.

use serde::{Deserialize, Serialize};

/// A node of a command's result tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeItem {
    /// Identifier unique within the driver that created the node.
    pub id: u64,
    /// `None` for a command root.
    pub parent: Option<u64>,
    pub text: String,
}

impl TreeItem {
    pub fn root(id: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            parent: None,
            text: text.into(),
        }
    }

    pub fn child(id: u64, parent: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            parent: Some(parent),
            text: text.into(),
        }
    }
}

/// New text for an existing tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub id: u64,
    pub text: String,
}

impl ItemUpdate {
    pub fn new(id: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// Long-lived interactive modes a connection can enter and leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandMode {
    /// Subscribed to one or more channels; only pub/sub commands are valid.
    PubSub,
    /// Streaming every command the backend processes.
    Monitor,
}

//! Request and response events exchanged between a facade and its driver.
//!
//! Every operation the facade offers is one [`EventKind`].  Issuing an
//! operation produces a [`Request`] of that kind; the driver answers with a
//! [`Response`] of the same kind.  Some kinds only ever travel as responses:
//! they are originated by the driver while it works (progress, result-tree
//! changes, mode changes).
//!
//! Both sides are closed sum types, so a router written as a `match` over
//! [`Response`] is checked by the compiler to handle every kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::tree::{CommandMode, ItemUpdate, TreeItem};
use crate::domain::{DatabaseInfo, HistoryEntry, PropertyType};
use crate::error::ErrorValue;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current envelope version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the envelope header in bytes.
pub const HEADER_SIZE: usize = 32;

/// Identity of the server facade that issued a request.
///
/// Responses are routed back to the facade with this id.
pub type ServerId = Uuid;

// ── Kind tags ─────────────────────────────────────────────────────────────────

/// Every event kind known to the protocol.
///
/// Operation kinds (0x01–0x3F) travel in both directions.  Driver-originated
/// kinds (0x40–0x7F) only travel from the driver to a facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    Connect = 0x01,
    Disconnect = 0x02,
    Execute = 0x03,
    Shutdown = 0x04,
    Backup = 0x05,
    Export = 0x06,
    LoadDatabases = 0x07,
    LoadDatabaseContent = 0x08,
    ServerInfo = 0x09,
    ServerProperty = 0x0A,
    ChangeProperty = 0x0B,
    ServerHistory = 0x0C,
    ProcessConfigArgs = 0x0D,
    RootCreated = 0x40,
    RootCompleted = 0x41,
    ChildAdded = 0x42,
    ItemUpdated = 0x43,
    EnterMode = 0x44,
    LeaveMode = 0x45,
    Progress = 0x46,
}

impl EventKind {
    /// Returns `true` for kinds only a driver can originate.
    pub fn is_driver_originated(self) -> bool {
        (self as u8) >= 0x40
    }
}

impl TryFrom<u8> for EventKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(EventKind::Connect),
            0x02 => Ok(EventKind::Disconnect),
            0x03 => Ok(EventKind::Execute),
            0x04 => Ok(EventKind::Shutdown),
            0x05 => Ok(EventKind::Backup),
            0x06 => Ok(EventKind::Export),
            0x07 => Ok(EventKind::LoadDatabases),
            0x08 => Ok(EventKind::LoadDatabaseContent),
            0x09 => Ok(EventKind::ServerInfo),
            0x0A => Ok(EventKind::ServerProperty),
            0x0B => Ok(EventKind::ChangeProperty),
            0x0C => Ok(EventKind::ServerHistory),
            0x0D => Ok(EventKind::ProcessConfigArgs),
            0x40 => Ok(EventKind::RootCreated),
            0x41 => Ok(EventKind::RootCompleted),
            0x42 => Ok(EventKind::ChildAdded),
            0x43 => Ok(EventKind::ItemUpdated),
            0x44 => Ok(EventKind::EnterMode),
            0x45 => Ok(EventKind::LeaveMode),
            0x46 => Ok(EventKind::Progress),
            _ => Err(()),
        }
    }
}

/// Direction an event travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventRole {
    /// Facade → driver.
    Request = 0x00,
    /// Driver → facade.
    Response = 0x01,
}

impl TryFrom<u8> for EventRole {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(EventRole::Request),
            0x01 => Ok(EventRole::Response),
            _ => Err(()),
        }
    }
}

/// Payloads that carry a kind tag and a fixed direction.
pub trait Tagged {
    /// Direction every payload of this type travels in.
    const ROLE: EventRole;

    fn kind(&self) -> EventKind;
}

// ── Request payloads ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectRequest;

/// Runs `command` verbatim on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub command: String,
}

/// Asks the backend server process itself to shut down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownRequest;

/// Writes a backup of the backend's data to `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRequest {
    pub path: String,
}

/// Restores the backend's data from the dump at `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDatabasesRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDatabaseContentRequest {
    pub database: DatabaseInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfoRequest;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPropertyRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePropertyRequest {
    pub new_item: PropertyType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHistoryRequest;

/// Internal follow-up to a successful connect: the driver applies the
/// connection's extra command-line arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfigArgsRequest;

/// A facade → driver payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Connect(ConnectRequest),
    Disconnect(DisconnectRequest),
    Execute(ExecuteRequest),
    Shutdown(ShutdownRequest),
    Backup(BackupRequest),
    Export(ExportRequest),
    LoadDatabases(LoadDatabasesRequest),
    LoadDatabaseContent(LoadDatabaseContentRequest),
    ServerInfo(ServerInfoRequest),
    ServerProperty(ServerPropertyRequest),
    ChangeProperty(ChangePropertyRequest),
    ServerHistory(ServerHistoryRequest),
    ProcessConfigArgs(ProcessConfigArgsRequest),
}

impl Tagged for Request {
    const ROLE: EventRole = EventRole::Request;

    fn kind(&self) -> EventKind {
        match self {
            Request::Connect(_) => EventKind::Connect,
            Request::Disconnect(_) => EventKind::Disconnect,
            Request::Execute(_) => EventKind::Execute,
            Request::Shutdown(_) => EventKind::Shutdown,
            Request::Backup(_) => EventKind::Backup,
            Request::Export(_) => EventKind::Export,
            Request::LoadDatabases(_) => EventKind::LoadDatabases,
            Request::LoadDatabaseContent(_) => EventKind::LoadDatabaseContent,
            Request::ServerInfo(_) => EventKind::ServerInfo,
            Request::ServerProperty(_) => EventKind::ServerProperty,
            Request::ChangeProperty(_) => EventKind::ChangeProperty,
            Request::ServerHistory(_) => EventKind::ServerHistory,
            Request::ProcessConfigArgs(_) => EventKind::ProcessConfigArgs,
        }
    }
}

// ── Response payloads ─────────────────────────────────────────────────────────
//
// Operation responses echo the request they answer so subscribers can pair
// them without tracking state, and carry an optional `ErrorValue`.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub request: ConnectRequest,
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectResponse {
    pub request: DisconnectRequest,
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub request: ExecuteRequest,
    pub error: Option<ErrorValue>,
}

/// Acknowledgement of a shutdown; facades do not surface it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub request: ShutdownRequest,
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupResponse {
    pub request: BackupRequest,
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResponse {
    pub request: ExportRequest,
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDatabasesResponse {
    pub request: LoadDatabasesRequest,
    pub databases: Vec<DatabaseInfo>,
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDatabaseContentResponse {
    pub request: LoadDatabaseContentRequest,
    pub keys: Vec<String>,
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfoResponse {
    pub request: ServerInfoRequest,
    /// `field -> value` as reported by the backend.
    pub info: BTreeMap<String, String>,
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPropertyResponse {
    pub request: ServerPropertyRequest,
    pub properties: Vec<PropertyType>,
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePropertyResponse {
    pub request: ChangePropertyRequest,
    pub is_changed: bool,
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHistoryResponse {
    pub request: ServerHistoryRequest,
    pub entries: Vec<HistoryEntry>,
    pub error: Option<ErrorValue>,
}

/// Acknowledgement of the post-connect follow-up; facades do not surface it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfigArgsResponse {
    pub request: ProcessConfigArgsRequest,
    pub error: Option<ErrorValue>,
}

/// The root node of a command's result tree was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCreated {
    pub root: TreeItem,
}

/// The command owning `root_id` finished producing results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCompleted {
    pub root_id: u64,
    pub elapsed_ms: u64,
}

/// A driver → facade payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Connect(ConnectResponse),
    Disconnect(DisconnectResponse),
    Execute(ExecuteResponse),
    Shutdown(ShutdownResponse),
    Backup(BackupResponse),
    Export(ExportResponse),
    LoadDatabases(LoadDatabasesResponse),
    LoadDatabaseContent(LoadDatabaseContentResponse),
    ServerInfo(ServerInfoResponse),
    ServerProperty(ServerPropertyResponse),
    ChangeProperty(ChangePropertyResponse),
    ServerHistory(ServerHistoryResponse),
    ProcessConfigArgs(ProcessConfigArgsResponse),
    RootCreated(RootCreated),
    RootCompleted(RootCompleted),
    ChildAdded(TreeItem),
    ItemUpdated(ItemUpdate),
    EnterMode(CommandMode),
    LeaveMode(CommandMode),
    /// Percentage (0–100) of the current operation.
    Progress(u8),
}

impl Response {
    /// Returns the error attached to an operation response, if any.
    ///
    /// Driver-originated kinds never carry one.
    pub fn error_info(&self) -> Option<&ErrorValue> {
        match self {
            Response::Connect(r) => r.error.as_ref(),
            Response::Disconnect(r) => r.error.as_ref(),
            Response::Execute(r) => r.error.as_ref(),
            Response::Shutdown(r) => r.error.as_ref(),
            Response::Backup(r) => r.error.as_ref(),
            Response::Export(r) => r.error.as_ref(),
            Response::LoadDatabases(r) => r.error.as_ref(),
            Response::LoadDatabaseContent(r) => r.error.as_ref(),
            Response::ServerInfo(r) => r.error.as_ref(),
            Response::ServerProperty(r) => r.error.as_ref(),
            Response::ChangeProperty(r) => r.error.as_ref(),
            Response::ServerHistory(r) => r.error.as_ref(),
            Response::ProcessConfigArgs(r) => r.error.as_ref(),
            Response::RootCreated(_)
            | Response::RootCompleted(_)
            | Response::ChildAdded(_)
            | Response::ItemUpdated(_)
            | Response::EnterMode(_)
            | Response::LeaveMode(_)
            | Response::Progress(_) => None,
        }
    }
}

impl Tagged for Response {
    const ROLE: EventRole = EventRole::Response;

    fn kind(&self) -> EventKind {
        match self {
            Response::Connect(_) => EventKind::Connect,
            Response::Disconnect(_) => EventKind::Disconnect,
            Response::Execute(_) => EventKind::Execute,
            Response::Shutdown(_) => EventKind::Shutdown,
            Response::Backup(_) => EventKind::Backup,
            Response::Export(_) => EventKind::Export,
            Response::LoadDatabases(_) => EventKind::LoadDatabases,
            Response::LoadDatabaseContent(_) => EventKind::LoadDatabaseContent,
            Response::ServerInfo(_) => EventKind::ServerInfo,
            Response::ServerProperty(_) => EventKind::ServerProperty,
            Response::ChangeProperty(_) => EventKind::ChangeProperty,
            Response::ServerHistory(_) => EventKind::ServerHistory,
            Response::ProcessConfigArgs(_) => EventKind::ProcessConfigArgs,
            Response::RootCreated(_) => EventKind::RootCreated,
            Response::RootCompleted(_) => EventKind::RootCompleted,
            Response::ChildAdded(_) => EventKind::ChildAdded,
            Response::ItemUpdated(_) => EventKind::ItemUpdated,
            Response::EnterMode(_) => EventKind::EnterMode,
            Response::LeaveMode(_) => EventKind::LeaveMode,
            Response::Progress(_) => EventKind::Progress,
        }
    }
}

// ── Event envelope ────────────────────────────────────────────────────────────

/// An immutable payload in flight, addressed by the facade that issued it.
///
/// `correlation` is the request id drawn from the issuing facade's
/// [`crate::protocol::RequestSequence`].  A response repeats the id of the
/// request it answers; driver-originated events carry the id of the request
/// that was running when they were produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event<P> {
    pub origin: ServerId,
    pub correlation: u64,
    pub payload: P,
}

/// An event travelling from a facade into the driver's context.
pub type RequestEvent = Event<Request>;

/// An event travelling from the driver back to a facade.
pub type ResponseEvent = Event<Response>;

impl<P> Event<P> {
    pub fn new(origin: ServerId, correlation: u64, payload: P) -> Self {
        Self {
            origin,
            correlation,
            payload,
        }
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

impl<P: Tagged> Event<P> {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn role(&self) -> EventRole {
        P::ROLE
    }
}

//! In-memory key/value driver.
//!
//! [`MemoryDriver`] keeps sixteen numbered databases of string keys and values
//! in process memory and understands a small Redis-like command set.  It has
//! no network dependency, which makes it the driver of choice for tests and
//! for trying the console without a backend.
//!
//! # Supported commands
//!
//! | Command                          | Result                               |
//! |----------------------------------|--------------------------------------|
//! | `PING [msg]`                     | `PONG` or `msg`                      |
//! | `ECHO msg`                       | `msg`                                |
//! | `SET key value...`               | `OK`                                 |
//! | `GET key`                        | the value or `(nil)`                 |
//! | `KEYS pattern`                   | matching keys (`*`, `prefix*`, exact)|
//! | `FLUSHDB`                        | `OK`                                 |
//! | `SELECT index`                   | `OK`                                 |
//! | `SUBSCRIBE channel...`           | enters pub/sub mode                  |
//! | `UNSUBSCRIBE [channel...]`       | leaves pub/sub mode when none remain |
//!
//! # Events produced by `execute`
//!
//! Each command builds a result tree.  The root is announced through the
//! request's outbox (root-created), every value is announced on the driver's
//! own [`NotificationHub`] (child-added) followed by a progress event, the
//! root text is updated with the result count (item-updated) and the root is
//! closed (root-completed).  Mode changes are posted as enter-mode /
//! leave-mode events.
//!
//! Hub emissions happen on the driver thread between outbox posts.  A master
//! server queues them on its inbox as they happen, so they reach its
//! subscribers in the same order.
//!
//! # Interruption
//!
//! [`Driver::interrupt`] raises a flag that `execute` checks before each
//! value.  The flag is cleared when the next request starts, so an interrupt
//! only ever affects the operation in progress.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dbshell_core::domain::{DatabaseInfo, HistoryEntry, PropertyType};
use dbshell_core::protocol::messages::*;
use dbshell_core::{
    CommandMode, ConnectionSettings, ErrorValue, ItemUpdate, Request, Response, TreeItem,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::application::driver::{Driver, Outbox};
use crate::application::notifications::{Notification, NotificationHub};

/// Number of numbered databases, as on a default Redis server.
pub const DATABASE_COUNT: usize = 16;

/// Commands accepted while subscribed to channels.
const PUBSUB_COMMANDS: [&str; 3] = ["SUBSCRIBE", "UNSUBSCRIBE", "PING"];

/// Server-info snapshots kept for history requests; the oldest go first.
pub const HISTORY_LIMIT: usize = 64;

/// On-disk form of a backup.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    databases: Vec<BTreeMap<String, String>>,
}

struct Session {
    connected: bool,
    selected: usize,
    mode: Option<CommandMode>,
    channels: BTreeSet<String>,
    databases: Vec<BTreeMap<String, String>>,
    properties: BTreeMap<String, String>,
    history: VecDeque<HistoryEntry>,
}

impl Session {
    fn new() -> Self {
        let properties = [
            ("appendonly", "no"),
            ("databases", "16"),
            ("maxmemory", "0"),
            ("timeout", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            connected: false,
            selected: 0,
            mode: None,
            channels: BTreeSet::new(),
            databases: vec![BTreeMap::new(); DATABASE_COUNT],
            properties,
            history: VecDeque::new(),
        }
    }

    fn db(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.databases[self.selected]
    }

    fn require_connected(&self) -> Result<(), ErrorValue> {
        if self.connected {
            Ok(())
        } else {
            Err(ErrorValue::error("not connected"))
        }
    }

    fn total_keys(&self) -> usize {
        self.databases.iter().map(BTreeMap::len).sum()
    }

    /// Leaves the current mode, if any, telling the facade.
    fn leave_mode(&mut self, outbox: &Outbox) {
        if let Some(mode) = self.mode.take() {
            outbox.post(Response::LeaveMode(mode));
        }
        self.channels.clear();
    }
}

/// A [`Driver`] backed by in-process maps.
pub struct MemoryDriver {
    settings: ConnectionSettings,
    hub: NotificationHub,
    session: Mutex<Session>,
    interrupted: AtomicBool,
    next_item: AtomicU64,
    step_delay: Duration,
}

impl MemoryDriver {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            hub: NotificationHub::new(),
            session: Mutex::new(Session::new()),
            interrupted: AtomicBool::new(false),
            next_item: AtomicU64::new(1),
            step_delay: Duration::ZERO,
        }
    }

    /// Sleeps for `delay` before producing each result value.
    ///
    /// Makes long-running commands observable, e.g. to interrupt them.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_item_id(&self) -> u64 {
        self.next_item.fetch_add(1, Ordering::Relaxed)
    }

    // ── Operations ───────────────────────────────────────────────────────────

    fn connect(&self) -> Result<(), ErrorValue> {
        let mut session = self.session();
        session.connected = true;
        session.selected = 0;
        info!(connection = %self.settings.connection_name, host = %self.settings.host, "connected");
        Ok(())
    }

    fn disconnect(&self, outbox: &Outbox) -> Result<(), ErrorValue> {
        let mut session = self.session();
        session.require_connected()?;
        session.leave_mode(outbox);
        session.connected = false;
        info!(connection = %self.settings.connection_name, "disconnected");
        Ok(())
    }

    fn shutdown(&self, outbox: &Outbox) -> Result<(), ErrorValue> {
        let mut session = self.session();
        session.require_connected()?;
        session.leave_mode(outbox);
        session.connected = false;
        info!(connection = %self.settings.connection_name, "backend shut down");
        Ok(())
    }

    fn execute(&self, command: &str, outbox: &Outbox) -> Result<(), ErrorValue> {
        let started = Instant::now();
        self.session().require_connected()?;

        let root = TreeItem::root(self.next_item_id(), command);
        let root_id = root.id;
        outbox.post(Response::RootCreated(RootCreated { root }));

        let complete = |outbox: &Outbox| {
            outbox.post(Response::RootCompleted(RootCompleted {
                root_id,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }));
        };

        // The session lock is released before values are announced so
        // `is_connected` stays responsive during slow commands.
        let values = match self.run(command, outbox) {
            Ok(values) => values,
            Err(e) => {
                complete(outbox);
                return Err(e);
            }
        };

        let total = values.len();
        for (index, value) in values.into_iter().enumerate() {
            if self.interrupted.load(Ordering::SeqCst) {
                debug!(command, produced = index, "execute interrupted");
                complete(outbox);
                return Err(ErrorValue::error("interrupted"));
            }
            if !self.step_delay.is_zero() {
                std::thread::sleep(self.step_delay);
            }
            self.hub.emit(Notification::ChildAdded(TreeItem::child(
                self.next_item_id(),
                root_id,
                value,
            )));
            outbox.progress(((index + 1) * 100 / total) as u8);
        }

        self.hub.emit(Notification::ItemUpdated(ItemUpdate::new(
            root_id,
            format!("{command} ({total} results)"),
        )));
        complete(outbox);
        Ok(())
    }

    /// Interprets one command against the session and returns its values.
    fn run(&self, command: &str, outbox: &Outbox) -> Result<Vec<String>, ErrorValue> {
        let parts: Vec<&str> = command.split_whitespace().collect();
        let Some((name, args)) = parts.split_first() else {
            return Err(ErrorValue::error("empty command"));
        };
        let name = name.to_ascii_uppercase();
        let mut session = self.session();

        if let Some(mode) = session.mode {
            if !PUBSUB_COMMANDS.contains(&name.as_str()) {
                return Err(ErrorValue::error(format!(
                    "only {} allowed in {mode:?} mode",
                    PUBSUB_COMMANDS.join(" / ")
                )));
            }
        }

        let arity = |ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(ErrorValue::error(format!(
                    "wrong number of arguments for '{}' command",
                    name.to_ascii_lowercase()
                )))
            }
        };

        let values: Vec<String> = match name.as_str() {
            "PING" => vec![if args.is_empty() {
                "PONG".to_string()
            } else {
                args.join(" ")
            }],
            "ECHO" => {
                arity(!args.is_empty())?;
                vec![args.join(" ")]
            }
            "SET" => {
                arity(args.len() >= 2)?;
                session
                    .db()
                    .insert(args[0].to_string(), args[1..].join(" "));
                vec!["OK".to_string()]
            }
            "GET" => {
                arity(args.len() == 1)?;
                vec![session
                    .db()
                    .get(args[0])
                    .cloned()
                    .unwrap_or_else(|| "(nil)".to_string())]
            }
            "KEYS" => {
                arity(args.len() == 1)?;
                let pattern = args[0];
                session
                    .db()
                    .keys()
                    .filter(|k| matches_pattern(k, pattern))
                    .cloned()
                    .collect()
            }
            "FLUSHDB" => {
                session.db().clear();
                vec!["OK".to_string()]
            }
            "SELECT" => {
                arity(args.len() == 1)?;
                let index = parse_database(args[0])?;
                session.selected = index;
                vec!["OK".to_string()]
            }
            "SUBSCRIBE" => {
                arity(!args.is_empty())?;
                if session.mode.is_none() {
                    session.mode = Some(CommandMode::PubSub);
                    outbox.post(Response::EnterMode(CommandMode::PubSub));
                }
                args.iter()
                    .map(|channel| {
                        session.channels.insert(channel.to_string());
                        format!("subscribe {channel} {}", session.channels.len())
                    })
                    .collect()
            }
            "UNSUBSCRIBE" => {
                let targets: Vec<String> = if args.is_empty() {
                    session.channels.iter().cloned().collect()
                } else {
                    args.iter().map(|c| c.to_string()).collect()
                };
                let values: Vec<String> = targets
                    .iter()
                    .map(|channel| {
                        session.channels.remove(channel);
                        format!("unsubscribe {channel} {}", session.channels.len())
                    })
                    .collect();
                if session.channels.is_empty() {
                    session.leave_mode(outbox);
                }
                values
            }
            _ => {
                return Err(ErrorValue::error(format!(
                    "unknown command '{}'",
                    parts[0]
                )))
            }
        };
        Ok(values)
    }

    fn backup(&self, path: &str) -> Result<(), ErrorValue> {
        let session = self.session();
        session.require_connected()?;
        let snapshot = Snapshot {
            databases: session.databases.clone(),
        };
        drop(session);

        let content = toml::to_string(&snapshot)
            .map_err(|e| ErrorValue::error(format!("backup serialization failed: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| ErrorValue::error(format!("backup to {path} failed: {e}")))?;
        info!(path, "backup written");
        Ok(())
    }

    fn export(&self, path: &str) -> Result<(), ErrorValue> {
        self.session().require_connected()?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| ErrorValue::error(format!("cannot read {path}: {e}")))?;
        let mut snapshot: Snapshot = toml::from_str(&content)
            .map_err(|e| ErrorValue::error(format!("{path} is not a valid backup: {e}")))?;
        snapshot.databases.resize_with(DATABASE_COUNT, BTreeMap::new);

        let mut session = self.session();
        session.databases = snapshot.databases;
        info!(path, keys = session.total_keys(), "backup restored");
        Ok(())
    }

    fn load_databases(&self) -> Result<Vec<DatabaseInfo>, ErrorValue> {
        let session = self.session();
        session.require_connected()?;
        Ok(session
            .databases
            .iter()
            .enumerate()
            .map(|(index, db)| DatabaseInfo::new(index.to_string(), db.len() as u64, index == 0))
            .collect())
    }

    fn load_database_content(&self, database: &DatabaseInfo) -> Result<Vec<String>, ErrorValue> {
        let session = self.session();
        session.require_connected()?;
        let index = parse_database(&database.name)?;
        Ok(session.databases[index].keys().cloned().collect())
    }

    fn server_info(&self) -> Result<BTreeMap<String, String>, ErrorValue> {
        let mut session = self.session();
        session.require_connected()?;

        let mut info = BTreeMap::new();
        info.insert("connection_name".to_string(), self.settings.connection_name.clone());
        info.insert("connection_type".to_string(), self.settings.connection_type.to_string());
        info.insert("selected_db".to_string(), session.selected.to_string());
        info.insert("total_keys".to_string(), session.total_keys().to_string());
        info.insert(
            "mode".to_string(),
            session
                .mode
                .map_or_else(|| "normal".to_string(), |m| format!("{m:?}").to_lowercase()),
        );
        for (index, db) in session.databases.iter().enumerate() {
            if !db.is_empty() {
                info.insert(format!("db{index}"), format!("keys={}", db.len()));
            }
        }

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        if session.history.len() == HISTORY_LIMIT {
            session.history.pop_front();
        }
        session.history.push_back(HistoryEntry {
            timestamp_ms,
            fields: info.clone(),
        });
        Ok(info)
    }

    fn server_property(&self) -> Result<Vec<PropertyType>, ErrorValue> {
        let session = self.session();
        session.require_connected()?;
        Ok(session
            .properties
            .iter()
            .map(|(k, v)| PropertyType::new(k.clone(), v.clone()))
            .collect())
    }

    fn change_property(&self, item: &PropertyType) -> Result<bool, ErrorValue> {
        let mut session = self.session();
        session.require_connected()?;
        match session.properties.get_mut(&item.key) {
            Some(value) if *value == item.value => Ok(false),
            Some(value) => {
                *value = item.value.clone();
                Ok(true)
            }
            None => Err(ErrorValue::error(format!("unknown property '{}'", item.key))),
        }
    }

    fn server_history(&self) -> Result<Vec<HistoryEntry>, ErrorValue> {
        let session = self.session();
        session.require_connected()?;
        Ok(session.history.iter().cloned().collect())
    }

    /// Applies the connection's extra arguments.  `-n <db>` selects a
    /// database; anything else is reported as a warning and skipped.
    fn process_config_args(&self) -> Result<(), ErrorValue> {
        let mut session = self.session();
        session.require_connected()?;

        let mut ignored = Vec::new();
        let mut args = self.settings.command_line.split_whitespace();
        while let Some(arg) = args.next() {
            match arg {
                "-n" => {
                    let index = args
                        .next()
                        .ok_or_else(|| ErrorValue::error("-n requires a database index"))
                        .and_then(parse_database)?;
                    session.selected = index;
                }
                other => ignored.push(other.to_string()),
            }
        }

        if ignored.is_empty() {
            Ok(())
        } else {
            Err(ErrorValue::warning(format!(
                "ignored unsupported arguments: {}",
                ignored.join(" ")
            )))
        }
    }
}

impl Driver for MemoryDriver {
    fn settings(&self) -> ConnectionSettings {
        self.settings.clone()
    }

    fn is_connected(&self) -> bool {
        self.session().connected
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn notifications(&self) -> NotificationHub {
        self.hub.clone()
    }

    fn handle_request(&self, request: Request, outbox: &Outbox) -> Option<Response> {
        self.interrupted.store(false, Ordering::SeqCst);

        let response = match request {
            Request::Connect(request) => Response::Connect(ConnectResponse {
                request,
                error: self.connect().err(),
            }),
            Request::Disconnect(request) => Response::Disconnect(DisconnectResponse {
                request,
                error: self.disconnect(outbox).err(),
            }),
            Request::Execute(request) => {
                let error = self.execute(&request.command, outbox).err();
                outbox.progress(100);
                Response::Execute(ExecuteResponse { request, error })
            }
            Request::Shutdown(request) => Response::Shutdown(ShutdownResponse {
                request,
                error: self.shutdown(outbox).err(),
            }),
            Request::Backup(request) => {
                let error = self.backup(&request.path).err();
                Response::Backup(BackupResponse { request, error })
            }
            Request::Export(request) => {
                let error = self.export(&request.path).err();
                Response::Export(ExportResponse { request, error })
            }
            Request::LoadDatabases(request) => {
                let (databases, error) = split(self.load_databases());
                Response::LoadDatabases(LoadDatabasesResponse {
                    request,
                    databases,
                    error,
                })
            }
            Request::LoadDatabaseContent(request) => {
                let (keys, error) = split(self.load_database_content(&request.database));
                Response::LoadDatabaseContent(LoadDatabaseContentResponse {
                    request,
                    keys,
                    error,
                })
            }
            Request::ServerInfo(request) => {
                let (info, error) = split(self.server_info());
                Response::ServerInfo(ServerInfoResponse {
                    request,
                    info,
                    error,
                })
            }
            Request::ServerProperty(request) => {
                let (properties, error) = split(self.server_property());
                Response::ServerProperty(ServerPropertyResponse {
                    request,
                    properties,
                    error,
                })
            }
            Request::ChangeProperty(request) => {
                let (is_changed, error) = split(self.change_property(&request.new_item));
                Response::ChangeProperty(ChangePropertyResponse {
                    request,
                    is_changed,
                    error,
                })
            }
            Request::ServerHistory(request) => {
                let (entries, error) = split(self.server_history());
                Response::ServerHistory(ServerHistoryResponse {
                    request,
                    entries,
                    error,
                })
            }
            Request::ProcessConfigArgs(request) => {
                Response::ProcessConfigArgs(ProcessConfigArgsResponse {
                    request,
                    error: self.process_config_args().err(),
                })
            }
        };
        Some(response)
    }
}

fn split<T: Default>(result: Result<T, ErrorValue>) -> (T, Option<ErrorValue>) {
    match result {
        Ok(value) => (value, None),
        Err(e) => (T::default(), Some(e)),
    }
}

fn parse_database(name: &str) -> Result<usize, ErrorValue> {
    name.parse::<usize>()
        .ok()
        .filter(|index| *index < DATABASE_COUNT)
        .ok_or_else(|| ErrorValue::error(format!("invalid database '{name}'")))
}

/// `*` matches everything, a trailing `*` matches a prefix, anything else
/// must match exactly.
fn matches_pattern(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Scripted driver for tests.
//!
//! [`ScriptedDriver`] records every request it serves and answers from a
//! per-kind script.  Kinds without a script get a plain success response, so
//! a test only scripts what it cares about.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use dbshell_core::protocol::messages::*;
use dbshell_core::{ConnectionSettings, EventKind, Request, Response};

use crate::application::driver::{Driver, Outbox};
use crate::application::notifications::NotificationHub;

/// A [`Driver`] that replays scripted responses.
pub struct ScriptedDriver {
    settings: ConnectionSettings,
    hub: NotificationHub,
    connected: AtomicBool,
    interrupts: AtomicUsize,
    received: Mutex<Vec<Request>>,
    script: Mutex<HashMap<EventKind, VecDeque<Vec<Response>>>>,
}

impl ScriptedDriver {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            hub: NotificationHub::new(),
            connected: AtomicBool::new(false),
            interrupts: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            script: Mutex::new(HashMap::new()),
        }
    }

    /// Queues one answer for the next request of `kind`.
    ///
    /// Every response in `answer` is posted in order.  Scripting the same
    /// kind again queues another answer behind the first.
    pub fn script(&self, kind: EventKind, answer: Vec<Response>) {
        lock(&self.script)
            .entry(kind)
            .or_default()
            .push_back(answer);
    }

    /// Requests served so far, in order.
    pub fn received(&self) -> Vec<Request> {
        lock(&self.received).clone()
    }

    /// Number of times [`Driver::interrupt`] was called.
    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }
}

impl Driver for ScriptedDriver {
    fn settings(&self) -> ConnectionSettings {
        self.settings.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    fn notifications(&self) -> NotificationHub {
        self.hub.clone()
    }

    fn handle_request(&self, request: Request, outbox: &Outbox) -> Option<Response> {
        lock(&self.received).push(request.clone());

        let scripted = lock(&self.script)
            .get_mut(&request.kind())
            .and_then(VecDeque::pop_front);

        let Some(answer) = scripted else {
            if matches!(request, Request::Connect(_)) {
                self.connected.store(true, Ordering::SeqCst);
            }
            if matches!(request, Request::Disconnect(_) | Request::Shutdown(_)) {
                self.connected.store(false, Ordering::SeqCst);
            }
            return acknowledge(request);
        };

        for response in answer {
            if let Response::Connect(r) = &response {
                self.connected.store(r.error.is_none(), Ordering::SeqCst);
            }
            outbox.post(response);
        }
        None
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds the success response answering `request`, with empty results.
pub fn acknowledge(request: Request) -> Option<Response> {
    let response = match request {
        Request::Connect(request) => Response::Connect(ConnectResponse {
            request,
            error: None,
        }),
        Request::Disconnect(request) => Response::Disconnect(DisconnectResponse {
            request,
            error: None,
        }),
        Request::Execute(request) => Response::Execute(ExecuteResponse {
            request,
            error: None,
        }),
        Request::Shutdown(request) => Response::Shutdown(ShutdownResponse {
            request,
            error: None,
        }),
        Request::Backup(request) => Response::Backup(BackupResponse {
            request,
            error: None,
        }),
        Request::Export(request) => Response::Export(ExportResponse {
            request,
            error: None,
        }),
        Request::LoadDatabases(request) => Response::LoadDatabases(LoadDatabasesResponse {
            request,
            databases: Vec::new(),
            error: None,
        }),
        Request::LoadDatabaseContent(request) => {
            Response::LoadDatabaseContent(LoadDatabaseContentResponse {
                request,
                keys: Vec::new(),
                error: None,
            })
        }
        Request::ServerInfo(request) => Response::ServerInfo(ServerInfoResponse {
            request,
            info: Default::default(),
            error: None,
        }),
        Request::ServerProperty(request) => Response::ServerProperty(ServerPropertyResponse {
            request,
            properties: Vec::new(),
            error: None,
        }),
        Request::ChangeProperty(request) => Response::ChangeProperty(ChangePropertyResponse {
            request,
            is_changed: true,
            error: None,
        }),
        Request::ServerHistory(request) => Response::ServerHistory(ServerHistoryResponse {
            request,
            entries: Vec::new(),
            error: None,
        }),
        Request::ProcessConfigArgs(request) => {
            Response::ProcessConfigArgs(ProcessConfigArgsResponse {
                request,
                error: None,
            })
        }
    };
    Some(response)
}

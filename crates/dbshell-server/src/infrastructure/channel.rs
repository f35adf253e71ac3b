//! Event channel between server facades and a driver thread.
//!
//! Each driver runs on a dedicated OS thread (`dbshell-driver`) that drains a
//! single unbounded queue of [`RequestEvent`]s.  Facades post into that queue
//! from any task; the thread serves the requests one after another, in the
//! order they arrived.
//!
//! Responses travel the other way through one unbounded queue per facade.  The
//! channel keeps a route table from [`ServerId`] to that queue: a facade
//! attaches when it is created and detaches when it closes.  Everything a
//! driver posts while serving a request lands in the origin's queue in the
//! order it was produced.
//!
//! ```text
//!  Server A ──post──┐                         ┌──► inbox A ──► router task A
//!                   ├──► request queue ──► driver thread
//!  Server B ──post──┘                         └──► inbox B ──► router task B
//! ```
//!
//! # Why a dedicated thread? (for beginners)
//!
//! A driver talks to a database with blocking calls.  Running those on a Tokio
//! worker would stall every other task scheduled on that worker.  A plain OS
//! thread can block as long as it likes; the thread reads its queue with
//! `blocking_recv`, which is the bridge from async senders to sync code.
//!
//! The thread exits once every [`DriverHandle`] is dropped and the queue is
//! empty.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use dbshell_core::protocol::UNCORRELATED;
use dbshell_core::{Event, RequestEvent, Response, ResponseEvent, ServerId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::driver::{Driver, Outbox};

/// Error type for event channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The driver thread could not be started.
    #[error("failed to spawn driver thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The driver thread is gone and can no longer accept events.
    #[error("driver channel closed")]
    Closed,

    /// No facade with this id is attached to the channel.
    #[error("no server attached with id {0}")]
    UnknownOrigin(ServerId),
}

type RouteTable = Mutex<HashMap<ServerId, mpsc::UnboundedSender<ResponseEvent>>>;
type Routes = Arc<RouteTable>;

fn lock_routes(
    routes: &RouteTable,
) -> MutexGuard<'_, HashMap<ServerId, mpsc::UnboundedSender<ResponseEvent>>> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle to a running driver thread.
#[derive(Clone)]
pub struct DriverHandle {
    requests: mpsc::UnboundedSender<RequestEvent>,
    routes: Routes,
    driver: Arc<dyn Driver>,
}

impl std::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("attached", &lock_routes(&self.routes).len())
            .field("closed", &self.requests.is_closed())
            .finish()
    }
}

/// Starts `driver` on its own thread and returns a handle for posting to it.
///
/// # Errors
///
/// Returns [`ChannelError::Spawn`] if the OS refuses to create the thread.
pub fn spawn_driver(driver: Arc<dyn Driver>) -> Result<DriverHandle, ChannelError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let routes: Routes = Arc::new(Mutex::new(HashMap::new()));

    let thread_driver = Arc::clone(&driver);
    let thread_routes = Arc::clone(&routes);
    std::thread::Builder::new()
        .name("dbshell-driver".to_string())
        .spawn(move || driver_loop(thread_driver, rx, thread_routes))
        .map_err(ChannelError::Spawn)?;

    info!(
        connection = %driver.settings().connection_name,
        "driver thread started"
    );
    Ok(DriverHandle {
        requests: tx,
        routes,
        driver,
    })
}

/// Receive loop executed on the driver thread.
fn driver_loop(
    driver: Arc<dyn Driver>,
    mut rx: mpsc::UnboundedReceiver<RequestEvent>,
    routes: Routes,
) {
    while let Some(event) = rx.blocking_recv() {
        let kind = event.kind();
        let origin = event.origin;
        let correlation = event.correlation;
        debug!(?kind, %origin, correlation, "driver received request");

        let route = lock_routes(&routes).get(&origin).cloned();
        if route.is_none() {
            warn!(?kind, %origin, "request from detached server, responses will be dropped");
        }
        let outbox = Outbox::new(origin, correlation, route);

        if let Some(response) = driver.handle_request(event.into_payload(), &outbox) {
            if !outbox.post(response) {
                debug!(?kind, %origin, "response dropped, server no longer listening");
            }
        }
    }

    info!("driver thread stopped");
}

impl DriverHandle {
    /// Queues `event` for the driver thread.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the driver thread has exited.
    pub fn post(&self, event: RequestEvent) -> Result<(), ChannelError> {
        self.requests.send(event).map_err(|_| ChannelError::Closed)
    }

    /// Registers `server` and returns the queue its responses arrive on.
    ///
    /// Attaching an id again replaces the previous queue.
    pub fn attach(&self, server: ServerId) -> mpsc::UnboundedReceiver<ResponseEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if lock_routes(&self.routes).insert(server, tx).is_some() {
            warn!(%server, "server re-attached, previous inbox closed");
        }
        rx
    }

    /// Removes `server` from the route table, closing its queue.
    ///
    /// Returns `false` if it was not attached.
    pub fn detach(&self, server: ServerId) -> bool {
        lock_routes(&self.routes).remove(&server).is_some()
    }

    pub fn is_attached(&self, server: ServerId) -> bool {
        lock_routes(&self.routes).contains_key(&server)
    }

    /// Delivers a response produced outside the driver thread (for example
    /// decoded from an out-of-process driver) to its origin's queue.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::UnknownOrigin`] if the origin is not attached.
    pub fn deliver(&self, event: ResponseEvent) -> Result<(), ChannelError> {
        let origin = event.origin;
        let routes = lock_routes(&self.routes);
        let route = routes
            .get(&origin)
            .ok_or(ChannelError::UnknownOrigin(origin))?;
        route.send(event).map_err(|_| ChannelError::UnknownOrigin(origin))
    }

    /// Returns an [`Inlet`] into `server`'s queue.
    pub fn inlet(&self, server: ServerId) -> Inlet {
        Inlet {
            server,
            routes: Arc::downgrade(&self.routes),
        }
    }

    /// The driver served by this channel.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }
}

/// Feeds events a driver announces outside any request into one facade's
/// queue, behind everything the driver has already posted there.
///
/// The route table is held weakly and looked up on every send, so an inlet
/// stored in a driver-side subscription neither keeps the channel alive nor
/// reaches a facade after it detached.
#[derive(Debug, Clone)]
pub struct Inlet {
    server: ServerId,
    routes: Weak<RouteTable>,
}

impl Inlet {
    /// Queues `response` for the server as an uncorrelated event.
    ///
    /// Returns `false` if the server is detached or the channel is gone.
    pub fn send(&self, response: Response) -> bool {
        let Some(routes) = self.routes.upgrade() else {
            return false;
        };
        let route = lock_routes(&routes).get(&self.server).cloned();
        route.is_some_and(|tx| {
            tx.send(Event::new(self.server, UNCORRELATED, response))
                .is_ok()
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! The seam between a server facade and the backend worker it drives.
//!
//! A [`Driver`] owns the real connection.  It never runs on the caller's task:
//! the event channel hands it one [`Request`] at a time on its own thread and
//! forwards whatever it answers back to the facade that asked.
//!
//! While serving a request a driver may report intermediate events (progress,
//! result-tree changes, mode changes) through the [`Outbox`] it is given.
//! Those reach the facade before the final response, in the order posted.

use dbshell_core::protocol::messages::Event;
use dbshell_core::{ConnectionSettings, ConnectionType, Request, Response, ServerId};
use tokio::sync::mpsc;
use tracing::debug;

use crate::application::notifications::NotificationHub;

/// Backend worker executing facade requests.
///
/// Implementations are shared between facades and the channel thread, so all
/// methods take `&self`; mutable state lives behind interior mutability.
#[cfg_attr(test, mockall::automock)]
pub trait Driver: Send + Sync {
    /// Settings the driver was created from.
    fn settings(&self) -> ConnectionSettings;

    fn connection_type(&self) -> ConnectionType {
        self.settings().connection_type
    }

    fn is_connected(&self) -> bool;

    /// Asks the operation in progress to stop early.
    ///
    /// Called from the facade's context, not the driver's.  Best effort: the
    /// operation may still complete and answer normally.
    fn interrupt(&self);

    /// Hub on which the driver announces child-added and item-updated
    /// notifications directly, outside the request/response flow.
    fn notifications(&self) -> NotificationHub;

    /// Serves one request.
    ///
    /// Returning `None` means the request has no response (or the driver
    /// already posted it through `outbox`).
    fn handle_request(&self, request: Request, outbox: &Outbox) -> Option<Response>;
}

/// Return path from a driver to the facade whose request it is serving.
///
/// Every event posted through an outbox carries the origin and correlation id
/// of the request it was created for.
#[derive(Debug, Clone)]
pub struct Outbox {
    origin: ServerId,
    correlation: u64,
    route: Option<mpsc::UnboundedSender<Event<Response>>>,
}

impl Outbox {
    /// Creates an outbox delivering to `route`.
    ///
    /// `route` is `None` when the origin has detached; posts are then dropped.
    pub fn new(
        origin: ServerId,
        correlation: u64,
        route: Option<mpsc::UnboundedSender<Event<Response>>>,
    ) -> Self {
        Self {
            origin,
            correlation,
            route,
        }
    }

    pub fn origin(&self) -> ServerId {
        self.origin
    }

    pub fn correlation(&self) -> u64 {
        self.correlation
    }

    /// Sends `response` to the origin facade.
    ///
    /// Returns `false` if the facade is no longer listening.
    pub fn post(&self, response: Response) -> bool {
        let Some(route) = &self.route else {
            debug!(origin = %self.origin, "origin detached, dropping response");
            return false;
        };
        route
            .send(Event::new(self.origin, self.correlation, response))
            .is_ok()
    }

    /// Shorthand for posting [`Response::Progress`].
    pub fn progress(&self, percent: u8) -> bool {
        self.post(Response::Progress(percent.min(100)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_outbox_stamps_origin_and_correlation() {
        // Arrange
        let (tx, mut rx) = mpsc::unbounded_channel();
        let origin = Uuid::new_v4();
        let outbox = Outbox::new(origin, 12, Some(tx));

        // Act
        assert!(outbox.progress(40));

        // Assert
        let event = rx.try_recv().expect("event");
        assert_eq!(event.origin, origin);
        assert_eq!(event.correlation, 12);
        assert_eq!(event.payload, Response::Progress(40));
    }

    #[test]
    fn test_outbox_without_route_drops_silently() {
        let outbox = Outbox::new(Uuid::new_v4(), 1, None);
        assert!(!outbox.progress(10));
    }

    #[test]
    fn test_progress_is_clamped_to_one_hundred() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(Uuid::new_v4(), 1, Some(tx));
        outbox.progress(250);
        assert_eq!(rx.try_recv().unwrap().payload, Response::Progress(100));
    }
}

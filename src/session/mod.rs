//! Streaming detection sessions.
//!
//! `DetectionSessionManager` owns the one logical streaming session of the
//! view. Each `open` cancels the previous connection and stamps the new one
//! with a strictly greater generation. Transports report progress as events
//! tagged with their generation, and the manager applies an event only while
//! that generation is still current, so a slow-closing connection cannot touch
//! the overlay of the camera that replaced it.
//!
//! Lifecycle:
//! - `Idle`: no connection
//! - `Connecting`: connection underway
//! - `Active`: initiation sent, detection messages flowing
//!
//! Closing is immediate from the manager's point of view (the cancel token is
//! flipped and the handle dropped) even if the transport's close handshake
//! finishes later. Transport failures land in `Idle`; there is no reconnect.

mod message;
mod transport;

use std::sync::mpsc::{self, Receiver, Sender};

use crate::error::{LiveDetectError, Result};
use crate::overlay::DetectionBox;

pub use message::{initiation_message, parse_stream_message};
pub use transport::{
    CancelToken, OpenRequest, SessionEvent, SessionEventKind, SessionEventSink, SessionTransport,
    WsTransport, DEFAULT_STREAM_ENDPOINT,
};

/// Identifies the currently open streaming connection.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    stream_url: String,
    generation: u64,
    cancel: CancelToken,
}

impl SessionHandle {
    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting { stream_url: String, generation: u64 },
    Active { stream_url: String, generation: u64 },
}

/// Published detection list. Each snapshot replaces the previous one.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionSnapshot {
    pub generation: u64,
    pub stream_url: Option<String>,
    pub detections: Vec<DetectionBox>,
}

/// What `handle_event` did with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// Event belonged to a replaced or closed session.
    Stale,
    Connected,
    DetectionsUpdated,
    /// Malformed message, session continues.
    MessageDropped,
    /// Session closed or failed; manager is idle.
    Ended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Connecting,
    Active,
}

struct CurrentSession {
    handle: SessionHandle,
    phase: Phase,
}

pub struct DetectionSessionManager {
    endpoint: String,
    transport: Box<dyn SessionTransport>,
    sink: SessionEventSink,
    generation: u64,
    current: Option<CurrentSession>,
    detections: Vec<DetectionBox>,
    subscribers: Vec<Sender<DetectionSnapshot>>,
}

impl DetectionSessionManager {
    /// `sink` receives every transport event; feed them back through
    /// [`handle_event`](Self::handle_event) on the owning thread.
    pub fn new(
        endpoint: impl Into<String>,
        transport: Box<dyn SessionTransport>,
        sink: SessionEventSink,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
            sink,
            generation: 0,
            current: None,
            detections: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Start a session for `stream_url`, replacing any existing one.
    pub fn open(&mut self, stream_url: &str) -> Result<SessionHandle> {
        self.cancel_current("replaced");
        self.generation += 1;
        let handle = SessionHandle {
            stream_url: stream_url.to_string(),
            generation: self.generation,
            cancel: CancelToken::new(),
        };
        let request = OpenRequest {
            endpoint: self.endpoint.clone(),
            stream_url: handle.stream_url.clone(),
            generation: handle.generation,
            cancel: handle.cancel.clone(),
            sink: self.sink.clone(),
        };

        self.current = Some(CurrentSession {
            handle: handle.clone(),
            phase: Phase::Connecting,
        });
        self.detections.clear();
        if let Err(err) = self.transport.open(request) {
            handle.cancel.cancel();
            self.current = None;
            self.publish();
            log::warn!(
                "detection session gen {} for {} failed to start: {}",
                handle.generation,
                stream_url,
                err
            );
            return Err(err);
        }
        self.publish();
        log::info!(
            "detection session gen {} connecting via {} ({}) for {}",
            handle.generation,
            self.endpoint,
            self.transport.name(),
            stream_url
        );
        Ok(handle)
    }

    /// Close the current session (view teardown).
    pub fn close(&mut self) {
        self.cancel_current("closed");
        if !self.detections.is_empty() {
            self.detections.clear();
            self.publish();
        }
    }

    /// Close and wait for transport workers to exit.
    pub fn shutdown(&mut self) {
        self.close();
        self.transport.shutdown();
    }

    /// Apply one transport event if it belongs to the current generation.
    pub fn handle_event(&mut self, event: SessionEvent) -> EventOutcome {
        let current_generation = self.current.as_ref().map(|s| s.handle.generation);
        if current_generation != Some(event.generation) {
            log::debug!(
                "discarding {:?} from stale session gen {} (current {:?})",
                event_name(&event.kind),
                event.generation,
                current_generation
            );
            return EventOutcome::Stale;
        }

        match event.kind {
            SessionEventKind::Opened => {
                self.set_phase(Phase::Active);
                log::info!("detection session gen {} active", event.generation);
                EventOutcome::Connected
            }
            SessionEventKind::Message(text) => match parse_stream_message(&text) {
                Ok(detections) => {
                    self.set_phase(Phase::Active);
                    self.detections = detections;
                    self.publish();
                    EventOutcome::DetectionsUpdated
                }
                Err(err) => {
                    log::warn!(
                        "dropping message on session gen {}: {}",
                        event.generation,
                        err
                    );
                    EventOutcome::MessageDropped
                }
            },
            SessionEventKind::Closed => {
                log::info!("detection session gen {} closed by service", event.generation);
                self.end_session();
                EventOutcome::Ended
            }
            SessionEventKind::Failed(reason) => {
                let err = LiveDetectError::SessionTransportError(reason);
                log::warn!("detection session gen {} ended: {}", event.generation, err);
                self.end_session();
                EventOutcome::Ended
            }
        }
    }

    /// Receive a snapshot every time the published list changes.
    pub fn subscribe(&mut self) -> Receiver<DetectionSnapshot> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn state(&self) -> SessionState {
        match &self.current {
            None => SessionState::Idle,
            Some(session) => {
                let stream_url = session.handle.stream_url.clone();
                let generation = session.handle.generation;
                match session.phase {
                    Phase::Connecting => SessionState::Connecting {
                        stream_url,
                        generation,
                    },
                    Phase::Active => SessionState::Active {
                        stream_url,
                        generation,
                    },
                }
            }
        }
    }

    /// Handle of the open session, if any.
    pub fn current(&self) -> Option<&SessionHandle> {
        self.current.as_ref().map(|s| &s.handle)
    }

    /// Latest generation handed out (0 before the first open).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn detections(&self) -> &[DetectionBox] {
        &self.detections
    }

    pub fn snapshot(&self) -> DetectionSnapshot {
        DetectionSnapshot {
            generation: self.generation,
            stream_url: self.current.as_ref().map(|s| s.handle.stream_url.clone()),
            detections: self.detections.clone(),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if let Some(session) = self.current.as_mut() {
            session.phase = phase;
        }
    }

    fn cancel_current(&mut self, reason: &str) {
        if let Some(session) = self.current.take() {
            session.handle.cancel.cancel();
            log::info!(
                "detection session gen {} {} ({})",
                session.handle.generation,
                reason,
                session.handle.stream_url
            );
        }
    }

    fn end_session(&mut self) {
        if let Some(session) = self.current.take() {
            session.handle.cancel.cancel();
        }
        self.detections.clear();
        self.publish();
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }
}

impl Drop for DetectionSessionManager {
    fn drop(&mut self) {
        if let Some(session) = self.current.take() {
            session.handle.cancel.cancel();
        }
    }
}

fn event_name(kind: &SessionEventKind) -> &'static str {
    match kind {
        SessionEventKind::Opened => "open",
        SessionEventKind::Message(_) => "message",
        SessionEventKind::Closed => "close",
        SessionEventKind::Failed(_) => "failure",
    }
}

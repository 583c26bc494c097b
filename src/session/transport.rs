//! Streaming connection transports.
//!
//! A transport opens one connection per [`OpenRequest`] and reports everything
//! that happens on it as [`SessionEvent`]s tagged with the request's
//! generation. It never touches session state itself; the manager decides
//! which events still matter.

use anyhow::{anyhow, Context};
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tungstenite::{Message, WebSocket};
use url::Url;

use super::message::initiation_message;
use crate::error::{LiveDetectError, Result};

/// Default streaming detection endpoint.
pub const DEFAULT_STREAM_ENDPOINT: &str = "ws://localhost:8000/ws";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared flag telling a worker its session was closed or replaced.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEventKind {
    /// Connected and the initiation message was sent.
    Opened,
    /// One raw message from the service.
    Message(String),
    /// Clean close by the service.
    Closed,
    /// Transport error; the connection is gone.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionEvent {
    pub generation: u64,
    pub kind: SessionEventKind,
}

/// Where transports deliver events; usually a channel into the view loop.
pub type SessionEventSink = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Everything a transport needs to run one session.
#[derive(Clone)]
pub struct OpenRequest {
    pub endpoint: String,
    pub stream_url: String,
    pub generation: u64,
    pub cancel: CancelToken,
    pub sink: SessionEventSink,
}

impl OpenRequest {
    pub fn emit(&self, kind: SessionEventKind) {
        (self.sink)(SessionEvent {
            generation: self.generation,
            kind,
        });
    }
}

/// Opens streaming connections.
pub trait SessionTransport: Send {
    fn name(&self) -> &'static str;

    /// Start a connection. Returns once it is underway; progress arrives
    /// through the request's sink.
    fn open(&mut self, request: OpenRequest) -> Result<()>;

    /// Wait for outstanding connections to wind down.
    fn shutdown(&mut self) {}
}

/// Websocket transport, one worker thread per session.
pub struct WsTransport {
    poll_interval: Duration,
    connect_timeout: Duration,
    workers: Vec<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            workers: Vec::new(),
        }
    }

    /// How often a blocked read wakes up to check for cancellation.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTransport for WsTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn open(&mut self, request: OpenRequest) -> Result<()> {
        self.workers.retain(|worker| !worker.is_finished());
        let poll_interval = self.poll_interval;
        let connect_timeout = self.connect_timeout;
        let worker = std::thread::Builder::new()
            .name(format!("detect-session-{}", request.generation))
            .spawn(move || run_session(request, poll_interval, connect_timeout))
            .map_err(|e| {
                LiveDetectError::SessionTransportError(format!("spawn session worker: {}", e))
            })?;
        self.workers.push(worker);
        Ok(())
    }

    fn shutdown(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::warn!("detection session worker panicked");
            }
        }
    }
}

enum SessionEnd {
    Cancelled,
    ClosedByPeer,
}

fn run_session(request: OpenRequest, poll_interval: Duration, connect_timeout: Duration) {
    match stream_detections(&request, poll_interval, connect_timeout) {
        Ok(SessionEnd::ClosedByPeer) => request.emit(SessionEventKind::Closed),
        Ok(SessionEnd::Cancelled) => {
            log::debug!("detection session gen {} cancelled", request.generation);
        }
        Err(err) => {
            if request.cancel.is_cancelled() {
                log::debug!(
                    "detection session gen {} ended after cancel: {:#}",
                    request.generation,
                    err
                );
            } else {
                request.emit(SessionEventKind::Failed(format!("{:#}", err)));
            }
        }
    }
}

fn stream_detections(
    request: &OpenRequest,
    poll_interval: Duration,
    connect_timeout: Duration,
) -> anyhow::Result<SessionEnd> {
    let mut socket = connect(&request.endpoint, connect_timeout)?;
    if request.cancel.is_cancelled() {
        let _ = socket.close(None);
        return Ok(SessionEnd::Cancelled);
    }

    socket
        .send(Message::Text(initiation_message(&request.stream_url)))
        .context("send stream initiation")?;
    socket
        .get_ref()
        .set_read_timeout(Some(poll_interval))
        .context("set websocket read timeout")?;
    request.emit(SessionEventKind::Opened);

    loop {
        if request.cancel.is_cancelled() {
            let _ = socket.close(None);
            let _ = socket.flush();
            return Ok(SessionEnd::Cancelled);
        }
        match socket.read() {
            Ok(Message::Text(text)) => request.emit(SessionEventKind::Message(text)),
            Ok(Message::Binary(bytes)) => request.emit(SessionEventKind::Message(
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
            Ok(Message::Close(_)) => {
                let _ = socket.flush();
                return Ok(SessionEnd::ClosedByPeer);
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                return Ok(SessionEnd::ClosedByPeer);
            }
            Err(err) => return Err(anyhow!(err).context("read detection stream")),
        }
    }
}

fn connect(endpoint: &str, timeout: Duration) -> anyhow::Result<WebSocket<TcpStream>> {
    let url = Url::parse(endpoint).with_context(|| format!("parse stream endpoint {}", endpoint))?;
    if url.scheme() != "ws" {
        return Err(anyhow!(
            "unsupported stream endpoint scheme '{}'; expected ws",
            url.scheme()
        ));
    }
    let addrs = url
        .socket_addrs(|| Some(80))
        .with_context(|| format!("resolve {}", endpoint))?;
    let addr = addrs
        .first()
        .ok_or_else(|| anyhow!("{} resolved to no addresses", endpoint))?;
    let stream = TcpStream::connect_timeout(addr, timeout)
        .with_context(|| format!("connect to {}", endpoint))?;
    stream
        .set_read_timeout(Some(timeout))
        .context("set handshake timeout")?;
    let (socket, _response) = tungstenite::client(endpoint, stream)
        .map_err(|e| anyhow!("websocket handshake with {}: {}", endpoint, e))?;
    log::debug!("websocket connected to {}", endpoint);
    Ok(socket)
}

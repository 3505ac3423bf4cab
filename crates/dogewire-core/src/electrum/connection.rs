//! Single upstream socket with reconnect-on-retarget semantics.
//!
//! One [`ConnectionManager`] owns at most one live socket. The connection
//! lock serializes connects and request registration. Each connection runs
//! a reader task that routes inbound frames and a writer task that drains
//! the outbound queue, so no lock is held while the socket is written.
//! Every connection gets a generation number so a task that outlives its
//! socket cannot tear down a newer one.

use std::fmt;
use std::io;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, trace, warn};

use crate::error::CoreError;

use super::dispatcher::RequestDispatcher;
use super::framing::{Frame, FrameCodec};
use super::protocol::{
    decode_frame, encode_request, Notification, ServerMessage, METHOD_SCRIPTHASH_SUBSCRIBE,
};
use super::subscriptions::SubscriptionRegistry;
use super::tls;

const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

// ==============================================================================
// Target and Options
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Tls,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Tls => write!(f, "tls"),
        }
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" | "t" => Ok(Self::Tcp),
            "tls" | "ssl" | "s" => Ok(Self::Tls),
            other => Err(format!("unknown transport `{other}` (expected tcp or tls)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
}

impl ConnectionTarget {
    pub fn new(host: impl Into<String>, port: u16, transport: Transport) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.transport, self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Tunables for an Electrum client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Sent as the first `server.version` parameter.
    pub client_name: String,
    pub protocol_version: String,
    pub connect_timeout: Duration,
    /// Longest accepted inbound line in bytes.
    pub max_frame_len: usize,
    /// Require TLS certificates to chain to a public root.
    pub verify_tls: bool,
    pub requests_per_second: Option<u32>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_name: concat!("dogewire/", env!("CARGO_PKG_VERSION")).to_owned(),
            protocol_version: "1.4".to_owned(),
            connect_timeout: Duration::from_secs(10),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            verify_tls: false,
            requests_per_second: None,
        }
    }
}

// ==============================================================================
// Socket Plumbing
// ==============================================================================

trait ElectrumStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ElectrumStream for T {}

type BoxedStream = Box<dyn ElectrumStream>;
type LineReader = FramedRead<ReadHalf<BoxedStream>, FrameCodec>;
type LineWriter = FramedWrite<WriteHalf<BoxedStream>, LinesCodec>;

async fn open_stream(target: &ConnectionTarget, verify_tls: bool) -> io::Result<BoxedStream> {
    let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
    tcp.set_nodelay(true)?;
    match target.transport {
        Transport::Tcp => Ok(Box::new(tcp)),
        Transport::Tls => {
            let connector = tls::connector(verify_tls)?;
            let stream = connector.connect(tls::server_name(&target.host)?, tcp).await?;
            Ok(Box::new(stream))
        }
    }
}

struct Link {
    state: ConnectionState,
    target: Option<ConnectionTarget>,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

struct Shared {
    link: Mutex<Link>,
    dispatcher: RequestDispatcher,
    registry: Arc<SubscriptionRegistry>,
    sockets_opened: AtomicU64,
}

impl Shared {
    /// Drop the socket without a graceful shutdown and fail everything in
    /// flight.
    fn teardown(&self, link: &mut Link) {
        if let Some(reader) = link.reader.take() {
            reader.abort();
        }
        if let Some(writer) = link.writer.take() {
            writer.abort();
        }
        link.outbound = None;
        link.state = ConnectionState::Disconnected;
        let failed = self.dispatcher.fail_all(|| CoreError::ConnectionLost);
        if failed > 0 {
            debug!(failed, "pending requests failed on teardown");
        }
    }

    /// Register, encode and queue one request. The caller holds the link.
    fn submit(
        &self,
        link: &Link,
        method: &str,
        params: &[Value],
    ) -> Result<oneshot::Receiver<Result<Value, CoreError>>, CoreError> {
        if link.state != ConnectionState::Connected {
            return Err(CoreError::NotConnected);
        }
        let Some(outbound) = link.outbound.as_ref() else {
            return Err(CoreError::NotConnected);
        };

        let (id, receiver) = self.dispatcher.register(method);
        let line = match encode_request(id, method, params) {
            Ok(line) => line,
            Err(err) => {
                self.dispatcher.cancel(id);
                return Err(err);
            }
        };

        debug!(rpc.id = id, rpc.method = method, rpc.params = params.len(), "rpc call");
        if outbound.send(line).is_err() {
            self.dispatcher.cancel(id);
            return Err(CoreError::ConnectionLost);
        }
        Ok(receiver)
    }

    fn route(&self, line: &str) {
        match decode_frame(line) {
            Ok(ServerMessage::Response { id, outcome }) => self.dispatcher.resolve(id, outcome),
            Ok(ServerMessage::Notification(Notification::ScripthashStatus { scripthash, status })) => {
                self.registry
                    .on_topic_notification(&scripthash, status.as_deref());
            }
            Ok(ServerMessage::Notification(Notification::Header { height })) => {
                debug!(height, "header notification ignored");
            }
            Ok(ServerMessage::Notification(Notification::Other { method })) => {
                debug!(%method, "notification ignored");
            }
            Err(err) => warn!(error = %err, len = line.len(), "discarding malformed frame"),
        }
    }

    async fn connection_lost(&self, generation: u64, reason: &str) {
        let mut link = self.link.lock().await;
        if link.generation != generation {
            trace!(generation, current = link.generation, "stale reader exited");
            return;
        }
        if let Some(target) = &link.target {
            warn!(%target, reason, "electrum connection lost");
        }
        self.teardown(&mut link);
    }
}

async fn read_loop(shared: Weak<Shared>, generation: u64, target: ConnectionTarget, mut frames: LineReader) {
    let reason = loop {
        match frames.next().await {
            Some(Ok(Frame::Line(line))) => {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                trace!(%target, len = line.len(), "frame received");
                shared.route(&line);
            }
            Some(Ok(Frame::Discarded(reason))) => {
                warn!(%target, reason, "discarding inbound frame");
            }
            Some(Err(err)) => break format!("read error: {err}"),
            None => break "closed by peer".to_owned(),
        }
    };
    if let Some(shared) = shared.upgrade() {
        shared.connection_lost(generation, &reason).await;
    }
}

async fn write_loop(
    shared: Weak<Shared>,
    generation: u64,
    target: ConnectionTarget,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut sink: LineWriter,
) {
    while let Some(line) = outbound.recv().await {
        if let Err(err) = sink.send(line).await {
            warn!(%target, error = %err, "write to electrum server failed");
            if let Some(shared) = shared.upgrade() {
                shared
                    .connection_lost(generation, &format!("write error: {err}"))
                    .await;
            }
            return;
        }
    }
}

// ==============================================================================
// Connection Manager
// ==============================================================================

pub struct ConnectionManager {
    shared: Arc<Shared>,
    options: ClientOptions,
    limiter: Option<DirectRateLimiter>,
}

impl ConnectionManager {
    pub fn new(options: ClientOptions, registry: Arc<SubscriptionRegistry>) -> Result<Self, CoreError> {
        let limiter = match options.requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::InvalidConfig("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            shared: Arc::new(Shared {
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    target: None,
                    generation: 0,
                    outbound: None,
                    reader: None,
                    writer: None,
                }),
                dispatcher: RequestDispatcher::new(),
                registry,
                sockets_opened: AtomicU64::new(0),
            }),
            options,
            limiter,
        })
    }

    /// Make sure a connection to `target` is up, replacing any connection to
    /// a different target.
    pub async fn ensure_connected(&self, target: &ConnectionTarget) -> Result<(), CoreError> {
        let mut link = self.shared.link.lock().await;
        if link.state == ConnectionState::Connected && link.target.as_ref() == Some(target) {
            return Ok(());
        }

        if link.state != ConnectionState::Disconnected {
            info!(from = ?link.target, to = %target, "retargeting electrum connection");
        }
        self.shared.teardown(&mut link);
        link.generation += 1;
        link.state = ConnectionState::Connecting;
        link.target = Some(target.clone());
        let generation = link.generation;

        debug!(%target, generation, "connecting");
        let stream = match tokio::time::timeout(
            self.options.connect_timeout,
            open_stream(target, self.options.verify_tls),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                link.state = ConnectionState::Disconnected;
                return Err(CoreError::Connect {
                    target: target.clone(),
                    source,
                });
            }
            Err(_) => {
                link.state = ConnectionState::Disconnected;
                return Err(CoreError::Connect {
                    target: target.clone(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                });
            }
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let frames = FramedRead::new(read_half, FrameCodec::new(self.options.max_frame_len));
        let sink = FramedWrite::new(write_half, LinesCodec::new());
        let (outbound, queue) = mpsc::unbounded_channel();
        link.outbound = Some(outbound);
        link.reader = Some(tokio::spawn(read_loop(
            Arc::downgrade(&self.shared),
            generation,
            target.clone(),
            frames,
        )));
        link.writer = Some(tokio::spawn(write_loop(
            Arc::downgrade(&self.shared),
            generation,
            target.clone(),
            queue,
            sink,
        )));
        link.state = ConnectionState::Connected;
        self.shared.sockets_opened.fetch_add(1, Ordering::Relaxed);
        info!(%target, generation, "electrum connection established");

        self.handshake(&link, target);
        self.resubscribe(&link);
        Ok(())
    }

    /// Upstream subscriptions die with their socket. Re-issue them for every
    /// topic still watched locally.
    fn resubscribe(&self, link: &Link) {
        let topics = self.shared.registry.watched_topics();
        if topics.is_empty() {
            return;
        }
        debug!(topics = topics.len(), "restoring scripthash subscriptions");
        for topic in topics {
            let params = [Value::from(topic.to_string())];
            match self.shared.submit(link, METHOD_SCRIPTHASH_SUBSCRIBE, &params) {
                // The answer only carries the current status; nothing to wait for.
                Ok(receiver) => drop(receiver),
                Err(err) => {
                    warn!(scripthash = %topic, error = %err, "resubscribe failed");
                    return;
                }
            }
        }
    }

    /// Fire-and-forget `server.version`; failures are only logged.
    fn handshake(&self, link: &Link, target: &ConnectionTarget) {
        let params = [
            Value::from(self.options.client_name.as_str()),
            Value::from(self.options.protocol_version.as_str()),
        ];
        let receiver = match self.shared.submit(link, "server.version", &params) {
            Ok(receiver) => receiver,
            Err(err) => {
                warn!(%target, error = %err, "server.version handshake not sent");
                return;
            }
        };
        let target = target.clone();
        tokio::spawn(async move {
            match receiver.await {
                Ok(Ok(version)) => info!(%target, server = %version, "electrum handshake complete"),
                Ok(Err(err)) => warn!(%target, error = %err, "server.version handshake failed"),
                Err(_) => warn!(%target, "server.version handshake abandoned"),
            }
        });
    }

    /// Send one request over the current connection. Never connects.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CoreError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let receiver = {
            let link = self.shared.link.lock().await;
            self.shared.submit(&link, method, &params)?
        };
        receiver.await.map_err(|_| CoreError::ConnectionLost)?
    }

    /// End the connection. Pending requests fail with `ConnectionLost`.
    pub async fn close(&self) {
        let mut link = self.shared.link.lock().await;
        if let Some(target) = link.target.take() {
            info!(%target, "closing electrum connection");
        }
        self.shared.teardown(&mut link);
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.link.lock().await.state
    }

    pub async fn target(&self) -> Option<ConnectionTarget> {
        self.shared.link.lock().await.target.clone()
    }

    /// Number of sockets opened over the manager's lifetime.
    pub fn sockets_opened(&self) -> u64 {
        self.shared.sockets_opened.load(Ordering::Relaxed)
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.dispatcher.pending_len()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut link) = self.shared.link.try_lock() {
            if let Some(reader) = link.reader.take() {
                reader.abort();
            }
            if let Some(writer) = link.writer.take() {
                writer.abort();
            }
        }
    }
}

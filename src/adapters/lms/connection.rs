//! Persistent LMS CLI session (TCP port 9090)
//!
//! The CLI has no request/response correlation ids: replies are matched to
//! requests purely by send order. `Connection` therefore owns exactly one
//! transport and serializes every round trip behind a single mutex.
//!
//! ## State machine
//!
//! ```text
//! Disconnected → Connecting → Ready
//! Ready --(transport lost)--> Reconnecting → Ready | Failed
//! Ready --(reply timeout)---> Reconnecting   (reopened on the next request)
//! Failed --(restart)--------> Connecting
//! ```
//!
//! A lost transport gets exactly one reconnect attempt; if it succeeds the
//! request is retried once. `Failed` is terminal until [`Connection::restart`].

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::codec::{decode_line, Command};
use super::error::{LmsError, Result};

/// Default CLI port
pub const DEFAULT_CLI_PORT: u16 = 9090;
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Byte-level line transport.
#[async_trait]
pub trait Transport: Send {
    /// Write `line` followed by the `\n` terminator and flush
    async fn write_line(&mut self, line: &str) -> std::io::Result<()>;

    /// Read up to and including the next `\n`.
    ///
    /// Returns an empty buffer on EOF, and a buffer without the terminator
    /// when the stream ends mid-line.
    async fn read_line(&mut self) -> std::io::Result<Vec<u8>>;
}

/// Opens transports to one endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>>;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String;
}

/// Buffered line transport over any byte stream
pub struct LineStream<S> {
    inner: BufStream<S>,
}

impl<S> LineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufStream::new(stream),
        }
    }
}

#[async_trait]
impl<S> Transport for LineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let framed = format!("{}\n", line);
        self.inner.write_all(framed.as_bytes()).await?;
        self.inner.flush().await
    }

    async fn read_line(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.read_until(b'\n', &mut buf).await?;
        Ok(buf)
    }
}

/// TCP connector for the LMS CLI
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let addr = self.endpoint();
        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                LmsError::connection(format!(
                    "connect to {} timed out after {:?}",
                    addr, self.connect_timeout
                ))
            })?
            .map_err(|e| LmsError::connection(format!("connect to {} failed: {}", addr, e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
        }

        Ok(Box::new(LineStream::new(stream)))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Outcome of one write/read exchange on an open transport
enum ExchangeError {
    /// Write failed, read failed, or EOF before a reply
    Lost(String),
    TimedOut,
    /// Stream ended mid-line; the transport is unusable
    Unterminated,
    /// Reply bytes are not text
    Malformed(String),
}

struct Session {
    transport: Option<Box<dyn Transport>>,
}

struct ConnectionInner {
    connector: Box<dyn Connector>,
    io_timeout: Duration,
    session: Mutex<Session>,
    state: watch::Sender<ConnectionState>,
}

/// Single shared LMS CLI session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub fn new(connector: impl Connector + 'static, io_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ConnectionInner {
                connector: Box::new(connector),
                io_timeout,
                session: Mutex::new(Session { transport: None }),
                state,
            }),
        }
    }

    /// Connect over TCP to `host:port`
    pub fn tcp(
        host: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Self {
        Self::new(TcpConnector::new(host, port, connect_timeout), io_timeout)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn endpoint(&self) -> String {
        self.inner.connector.endpoint()
    }

    pub fn io_timeout(&self) -> Duration {
        self.inner.io_timeout
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!("LMS connection state: {} -> {}", previous, state);
        }
    }

    /// Establish the session. A no-op when already `Ready`.
    pub async fn connect(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        if session.transport.is_some() && self.state() == ConnectionState::Ready {
            return Ok(());
        }
        self.open(&mut session, ConnectionState::Connecting).await
    }

    /// Drop any existing transport and connect again, leaving `Failed`
    pub async fn restart(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        session.transport = None;
        self.set_state(ConnectionState::Disconnected);
        info!("Restarting LMS connection to {}", self.endpoint());
        self.open(&mut session, ConnectionState::Connecting).await
    }

    /// Open a transport; failure leaves the connection `Failed`
    async fn open(&self, session: &mut Session, via: ConnectionState) -> Result<()> {
        self.set_state(via);
        match self.inner.connector.connect().await {
            Ok(transport) => {
                session.transport = Some(transport);
                self.set_state(ConnectionState::Ready);
                info!("Connected to LMS CLI at {}", self.endpoint());
                Ok(())
            }
            Err(e) => {
                session.transport = None;
                self.set_state(ConnectionState::Failed);
                warn!("LMS connection to {} failed: {}", self.endpoint(), e);
                Err(e)
            }
        }
    }

    /// Write one framed line and read exactly one terminated reply line.
    ///
    /// Runs on its own task so a caller that stops waiting does not cancel
    /// the exchange halfway and desynchronize the reply stream.
    pub async fn send_and_receive(&self, line: &str) -> Result<String> {
        let this = self.clone();
        let line = line.to_string();
        match tokio::spawn(async move { this.round_trip(&line).await }).await {
            Ok(result) => result,
            Err(e) => {
                // The exchange stopped at an unknown point; the stream is out of sync
                let mut session = self.inner.session.lock().await;
                session.transport = None;
                if self.state() != ConnectionState::Failed {
                    self.set_state(ConnectionState::Reconnecting);
                }
                warn!("LMS request task failed, will reconnect on next request: {}", e);
                Err(LmsError::connection(format!("LMS request task failed: {}", e)))
            }
        }
    }

    /// Encode `command`, send it, decode the reply and verify its echo
    pub async fn request(&self, command: &Command) -> Result<Vec<String>> {
        let reply = self.send_and_receive(&command.encode()?).await?;
        let tokens = decode_line(&reply)?;
        command.verify_echo(&tokens)?;
        Ok(tokens)
    }

    async fn round_trip(&self, line: &str) -> Result<String> {
        let mut session = self.inner.session.lock().await;

        match self.state() {
            ConnectionState::Failed => {
                return Err(LmsError::connection(format!(
                    "connection to {} failed; restart required",
                    self.endpoint()
                )));
            }
            ConnectionState::Ready if session.transport.is_some() => {}
            ConnectionState::Reconnecting => {
                info!("Reopening LMS connection to {}", self.endpoint());
                self.open(&mut session, ConnectionState::Reconnecting).await?;
            }
            _ => {
                self.open(&mut session, ConnectionState::Connecting).await?;
            }
        }

        match self.exchange(&mut session, line).await {
            Ok(reply) => Ok(reply),
            Err(ExchangeError::Lost(reason)) => {
                warn!(
                    "LMS connection to {} lost ({}), reconnecting once",
                    self.endpoint(),
                    reason
                );
                session.transport = None;
                self.open(&mut session, ConnectionState::Reconnecting)
                    .await
                    .map_err(|e| {
                        LmsError::connection(format!("reconnect after '{}' failed: {}", reason, e))
                    })?;

                match self.exchange(&mut session, line).await {
                    Ok(reply) => Ok(reply),
                    Err(ExchangeError::Lost(reason)) => {
                        session.transport = None;
                        self.set_state(ConnectionState::Failed);
                        warn!("LMS connection lost again after reconnect: {}", reason);
                        Err(LmsError::connection(format!(
                            "connection lost after reconnect: {}",
                            reason
                        )))
                    }
                    Err(other) => Err(self.fail_exchange(&mut session, other)),
                }
            }
            Err(other) => Err(self.fail_exchange(&mut session, other)),
        }
    }

    /// Map a non-loss exchange failure, marking the session for reopening
    /// where the stream can no longer be trusted
    fn fail_exchange(&self, session: &mut Session, error: ExchangeError) -> LmsError {
        match error {
            ExchangeError::TimedOut => {
                session.transport = None;
                self.set_state(ConnectionState::Reconnecting);
                warn!(
                    "LMS reply timed out after {:?}, will reconnect on next request",
                    self.inner.io_timeout
                );
                LmsError::Timeout(self.inner.io_timeout)
            }
            ExchangeError::Unterminated => {
                session.transport = None;
                self.set_state(ConnectionState::Reconnecting);
                LmsError::protocol("reply line missing terminator")
            }
            ExchangeError::Malformed(msg) => LmsError::Protocol(msg),
            ExchangeError::Lost(reason) => LmsError::Connection(reason),
        }
    }

    async fn exchange(
        &self,
        session: &mut Session,
        line: &str,
    ) -> std::result::Result<String, ExchangeError> {
        let transport = session
            .transport
            .as_mut()
            .ok_or_else(|| ExchangeError::Lost("not connected".to_string()))?;

        debug!(line, "LMS request");

        let io = async {
            transport
                .write_line(line)
                .await
                .map_err(|e| ExchangeError::Lost(format!("write failed: {}", e)))?;
            transport
                .read_line()
                .await
                .map_err(|e| ExchangeError::Lost(format!("read failed: {}", e)))
        };

        let raw = timeout(self.inner.io_timeout, io)
            .await
            .map_err(|_| ExchangeError::TimedOut)??;

        if raw.is_empty() {
            return Err(ExchangeError::Lost("connection closed by server".to_string()));
        }
        if raw.last() != Some(&b'\n') {
            return Err(ExchangeError::Unterminated);
        }

        let reply = String::from_utf8(raw)
            .map_err(|e| ExchangeError::Malformed(format!("reply is not UTF-8: {}", e)))?;
        let reply = reply.trim_end_matches(['\r', '\n']).to_string();

        debug!(reply = %reply, "LMS response");
        Ok(reply)
    }
}

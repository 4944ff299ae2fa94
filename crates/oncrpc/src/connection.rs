//! # Connection
//!
//! One record-marked byte stream, split into independently locked halves.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The connection moves whole records. It knows nothing
//!   about xids or headers.
//! - **Replaceable**: The stream is produced by a `Connector`, so a dropped
//!   stream is redialed through the same connector with the same settings.
//!   Each redial bumps the `epoch`, which lets concurrent callers agree that
//!   one reconnect is enough.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;
use tracing::debug;
use tracing::warn;

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::record::read_record;
use crate::record::write_record;

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// A freshly dialed stream.
pub struct Dialed {
    pub stream: BoxedStream,
    pub local_addr: Option<SocketAddr>,
}

/// Produces streams to one fixed endpoint.
///
/// This trait is object-safe (`Arc<dyn Connector>`).
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Dialed, TransportError>;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;
}

/// Dials a TCP address.
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Dialed, TransportError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| TransportError::ConnectionLost(format!("{}: {}", self.addr, e)))?;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr().ok();
        Ok(Dialed { stream: Box::new(stream), local_addr })
    }

    fn endpoint(&self) -> String {
        self.addr.clone()
    }
}

pub struct Connection {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    reader: Mutex<Option<ReadHalf<BoxedStream>>>,
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    epoch: AtomicU64,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

impl Connection {
    /// Dials the connector once and splits the stream.
    pub async fn connect(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Result<Self, TransportError> {
        let dialed = connector.connect().await?;
        debug!(endpoint = %connector.endpoint(), "connected");
        let (reader, writer) = tokio::io::split(dialed.stream);
        Ok(Self {
            connector,
            config,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            epoch: AtomicU64::new(0),
            local_addr: std::sync::Mutex::new(dialed.local_addr),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Number of reconnects so far.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }

    /// Sends one record.
    ///
    /// A failed or timed-out write leaves the stream in an unknown state, so
    /// the write half is dropped and the next user has to reconnect.
    pub async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let Some(half) = guard.as_mut() else {
            return Err(TransportError::ConnectionLost("write half closed".into()));
        };
        let written = tokio::time::timeout(
            self.config.timeout,
            write_record(half, payload, self.config.chunk_size),
        )
        .await;
        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                *guard = None;
                Err(e)
            }
            Err(_) => {
                *guard = None;
                Err(TransportError::Timeout)
            }
        }
    }

    /// Takes exclusive ownership of the read half.
    ///
    /// Acquiring the lock is cancel-safe; reading through the returned guard
    /// is not, so callers select on this future and only then read.
    pub async fn lock_reader(&self) -> RecordReader<'_> {
        RecordReader {
            guard: self.reader.lock().await,
            config: &self.config,
        }
    }

    /// Receives one record.
    pub async fn receive(&self) -> Result<Vec<u8>, TransportError> {
        self.lock_reader().await.receive().await
    }

    /// Drops both halves and redials.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let mut reader = self.reader.lock().await;
        self.redial(&mut writer, &mut reader).await
    }

    /// Reconnects only if nobody has done so since `epoch` was observed.
    ///
    /// Returns whether this call performed the reconnect.
    pub async fn reconnect_if(&self, epoch: u64) -> Result<bool, TransportError> {
        let mut writer = self.writer.lock().await;
        let mut reader = self.reader.lock().await;
        if self.epoch() != epoch {
            return Ok(false);
        }
        self.redial(&mut writer, &mut reader).await?;
        Ok(true)
    }

    async fn redial(
        &self,
        writer: &mut MutexGuard<'_, Option<WriteHalf<BoxedStream>>>,
        reader: &mut MutexGuard<'_, Option<ReadHalf<BoxedStream>>>,
    ) -> Result<(), TransportError> {
        **writer = None;
        **reader = None;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(endpoint = %self.connector.endpoint(), epoch, "reconnecting");

        let dialed = self.connector.connect().await?;
        if let Ok(mut addr) = self.local_addr.lock() {
            *addr = dialed.local_addr;
        }
        let (r, w) = tokio::io::split(dialed.stream);
        **reader = Some(r);
        **writer = Some(w);
        Ok(())
    }
}

/// Exclusive access to the read half of a `Connection`.
pub struct RecordReader<'a> {
    guard: MutexGuard<'a, Option<ReadHalf<BoxedStream>>>,
    config: &'a ConnectionConfig,
}

impl RecordReader<'_> {
    /// Reads one record. On error the read half is discarded.
    pub async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let Some(half) = self.guard.as_mut() else {
            return Err(TransportError::ConnectionLost("read half closed".into()));
        };
        let read = tokio::time::timeout(
            self.config.timeout,
            read_record(half, self.config.max_record_size),
        )
        .await;
        match read {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(e)) => {
                *self.guard = None;
                Err(e)
            }
            Err(_) => {
                *self.guard = None;
                Err(TransportError::Timeout)
            }
        }
    }
}

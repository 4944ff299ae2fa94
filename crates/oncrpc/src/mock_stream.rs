//! In-memory streams and a scripted peer, for tests.
//!
//! `DuplexConnector` hands the client one end of a `tokio::io::duplex` pipe
//! per dial and delivers the other end through `DuplexAcceptor`, so a test can
//! play the server, drop connections and observe redials.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use xdrpack::Decoder;
use xdrpack::Encoder;
use xdrpack::Pack;

use crate::connection::Connector;
use crate::connection::Dialed;
use crate::error::Result;
use crate::error::TransportError;
use crate::message::CallHeader;
use crate::message::OpaqueAuth;
use crate::message::ReplyHeader;
use crate::record::DEFAULT_CHUNK_SIZE;
use crate::record::DEFAULT_MAX_RECORD_SIZE;
use crate::record::read_record;
use crate::record::write_record;

pub struct DuplexConnector {
    tx: mpsc::UnboundedSender<DuplexStream>,
    buffer: usize,
    dials: AtomicUsize,
}

pub struct DuplexAcceptor {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl DuplexConnector {
    pub fn pair() -> (Self, DuplexAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, buffer: 64 * 1024, dials: AtomicUsize::new(0) }, DuplexAcceptor { rx })
    }

    /// How many streams have been handed out.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self) -> std::result::Result<Dialed, TransportError> {
        let (client, server) = tokio::io::duplex(self.buffer);
        self.tx
            .send(server)
            .map_err(|_| TransportError::ConnectionLost("acceptor dropped".into()))?;
        self.dials.fetch_add(1, Ordering::SeqCst);
        Ok(Dialed { stream: Box::new(client), local_addr: None })
    }

    fn endpoint(&self) -> String {
        "duplex".into()
    }
}

impl DuplexAcceptor {
    /// Waits for the next dial and returns a peer over its server end.
    pub async fn accept(&mut self) -> Option<StubPeer<DuplexStream>> {
        self.rx.recv().await.map(StubPeer::new)
    }
}

/// A call as seen by the stub.
#[derive(Debug, Clone)]
pub struct ReceivedCall {
    pub header: CallHeader,
    pub verifier: OpaqueAuth,
    pub args: Vec<u8>,
    /// The whole record, for comparing resends.
    pub raw: Vec<u8>,
}

/// The server side of a stream, driven step by step by a test.
pub struct StubPeer<S> {
    stream: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> StubPeer<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub async fn read_call(&mut self) -> Result<ReceivedCall> {
        let raw = read_record(&mut self.stream, DEFAULT_MAX_RECORD_SIZE).await?;
        let mut dec = Decoder::new(&raw);
        let header: CallHeader = dec.unpack()?;
        let verifier: OpaqueAuth = dec.unpack()?;
        let args = dec.rest().to_vec();
        Ok(ReceivedCall { header, verifier, args, raw })
    }

    /// Accepted, successful reply carrying `body`.
    pub async fn reply(&mut self, xid: u32, body: &[u8]) -> Result<()> {
        self.reply_with(&ReplyHeader::success(xid, OpaqueAuth::none()), body).await
    }

    pub async fn reply_with(&mut self, header: &ReplyHeader, body: &[u8]) -> Result<()> {
        let mut enc = Encoder::new();
        header.pack(&mut enc)?;
        enc.raw(body)?;
        self.write_raw(enc.as_bytes()).await
    }

    /// Writes an arbitrary record.
    pub async fn write_raw(&mut self, record: &[u8]) -> Result<()> {
        write_record(&mut self.stream, record, DEFAULT_CHUNK_SIZE).await?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

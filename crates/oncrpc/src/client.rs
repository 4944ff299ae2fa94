//! # RPC Client
//!
//! Builds call headers through the security flavor, hands records to the
//! multiplexer and classifies replies.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;
use xdrpack::Decoder;
use xdrpack::Encoder;
use xdrpack::Pack;

use crate::auth::SecurityFlavor;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::connection::Connector;
use crate::connection::TcpConnector;
use crate::error::Error;
use crate::error::Result;
use crate::message::CallHeader;
use crate::message::RPC_VERSION;
use crate::message::ReplyBody;
use crate::message::ReplyHeader;
use crate::mux::Multiplexer;

pub struct RpcClient {
    config: ClientConfig,
    mux: Multiplexer,
    security: Arc<dyn SecurityFlavor>,
}

impl RpcClient {
    /// Connects over TCP.
    pub async fn connect(
        addr: impl Into<String>,
        config: ClientConfig,
        security: Arc<dyn SecurityFlavor>,
    ) -> Result<Self> {
        Self::with_connector(Arc::new(TcpConnector::new(addr)), config, security).await
    }

    /// Connects through an arbitrary connector and initializes the flavor.
    pub async fn with_connector(
        connector: Arc<dyn Connector>,
        config: ClientConfig,
        security: Arc<dyn SecurityFlavor>,
    ) -> Result<Self> {
        let connection = Connection::connect(connector, config.connection.clone()).await?;
        let client = Self {
            config,
            mux: Multiplexer::new(connection),
            security: security.clone(),
        };
        security.initialize(&client).await?;
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn security(&self) -> &Arc<dyn SecurityFlavor> {
        &self.security
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    /// Local address of the current stream, when it has one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.mux.connection().local_addr()
    }

    /// Sends a call to the configured program and returns its xid.
    pub async fn send(&self, procedure: u32, payload: &[u8]) -> Result<u32> {
        self.send_to(self.config.program, self.config.version, procedure, payload).await
    }

    /// Sends a call to an explicit program and version.
    pub async fn send_to(&self, program: u32, version: u32, procedure: u32, payload: &[u8]) -> Result<u32> {
        let xid = self.mux.next_xid();
        let (credential, sequence) = self.security.make_credential()?;

        let mut enc = Encoder::with_capacity(payload.len() + 128);
        CallHeader { xid, rpc_version: RPC_VERSION, program, version, procedure, credential }.pack(&mut enc)?;
        let verifier = self.security.make_verifier(enc.as_bytes())?;
        verifier.pack(&mut enc)?;
        let body = self.security.secure(payload.to_vec(), sequence)?;
        enc.raw(&body)?;

        debug!(xid, program, version, procedure, len = payload.len(), "call");
        self.mux.send(xid, enc.into_bytes(), sequence).await?;
        Ok(xid)
    }

    /// Waits for the reply to `xid` and returns the procedure results.
    pub async fn listen(&self, xid: u32) -> Result<Vec<u8>> {
        let delivered = self.mux.wait(xid).await?;
        let mut dec = Decoder::new(&delivered.record);
        let header: ReplyHeader = dec.unpack()?;
        match header.body {
            ReplyBody::Denied(reason) => Err(Error::Denied(reason)),
            ReplyBody::Accepted { result: Err(status), .. } => Err(Error::Accepted(status)),
            ReplyBody::Accepted { result: Ok(()), .. } => {
                self.security.unsecure(dec.rest().to_vec(), delivered.sequence)
            }
        }
    }

    pub async fn call(&self, procedure: u32, payload: &[u8]) -> Result<Vec<u8>> {
        let xid = self.send(procedure, payload).await?;
        self.listen(xid).await
    }

    /// Procedure 0. The reply must carry no results.
    pub async fn null(&self) -> Result<()> {
        let body = self.call(0, &[]).await?;
        if !body.is_empty() {
            return Err(Error::Protocol(format!("NULL reply carried {} bytes", body.len())));
        }
        Ok(())
    }
}

//! # Inbound Service
//!
//! A minimal RPC service skeleton: a TCP accept loop, one task per
//! connection, envelope checks done here and procedure bodies left to a
//! `Program`.
//!
//! The accept loop is steered through a command channel. `Suspend` holds
//! every connection after its next record is read (requests stay queued on the
//! socket), `Resume` releases them, `Shutdown` stops the loop and aborts the
//! connection tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::net::ToSocketAddrs;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::info;
use tracing::warn;
use xdrpack::Decoder;
use xdrpack::Encoder;
use xdrpack::Pack;

use crate::auth::SecurityFlavor;
use crate::config::ConnectionConfig;
use crate::connection::AsyncStream;
use crate::error::Error;
use crate::error::Result;
use crate::error::TransportError;
use crate::message::AcceptError;
use crate::message::CallHeader;
use crate::message::OpaqueAuth;
use crate::message::RPC_VERSION;
use crate::message::RejectReason;
use crate::message::ReplyHeader;
use crate::record::read_record;
use crate::record::write_record;

/// Outcome of a procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Encoded procedure results.
    Reply(Vec<u8>),
    ProcUnavail,
    GarbageArgs,
    SystemErr,
}

/// What a procedure gets to know about the call besides its arguments.
#[derive(Debug, Clone)]
pub struct CallContext<'a> {
    pub xid: u32,
    pub procedure: u32,
    pub credential: &'a OpaqueAuth,
    pub peer: Option<SocketAddr>,
}

/// One program/version pair served by a `Service`.
///
/// Procedure 0 (NULL) is answered by the service itself.
pub trait Program: Send + Sync + 'static {
    fn program(&self) -> u32;
    fn version(&self) -> u32;
    fn dispatch(&self, call: &CallContext<'_>, args: &[u8]) -> Dispatch;
}

/// A program plus the flavor used to verify replies.
#[derive(Clone)]
pub struct Service {
    program: Arc<dyn Program>,
    security: Arc<dyn SecurityFlavor>,
    config: ConnectionConfig,
}

impl Service {
    pub fn new(program: Arc<dyn Program>, security: Arc<dyn SecurityFlavor>) -> Self {
        Self { program, security, config: ConnectionConfig::default() }
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Turns one call record into one reply record.
    ///
    /// Fails only when the call header itself cannot be decoded, in which
    /// case there is no xid to answer.
    pub fn compute_reply(&self, record: &[u8], peer: Option<SocketAddr>) -> Result<Vec<u8>> {
        let mut dec = Decoder::new(record);
        let header: CallHeader = dec.unpack()?;
        let verifier: OpaqueAuth = dec.unpack()?;
        let args = dec.rest();

        let xid = header.xid;
        let reply_verifier = self.security.make_reply_verifier(&header.credential, &verifier)?;
        let served = self.program.version();

        let (reply, body) = if header.rpc_version != RPC_VERSION {
            let reason = RejectReason::RpcMismatch { low: RPC_VERSION, high: RPC_VERSION };
            (ReplyHeader::denied(xid, reason), Vec::new())
        } else if header.program != self.program.program() {
            (ReplyHeader::accepted_error(xid, reply_verifier, AcceptError::ProgUnavail), Vec::new())
        } else if header.version != served {
            let error = AcceptError::ProgMismatch { low: served, high: served };
            (ReplyHeader::accepted_error(xid, reply_verifier, error), Vec::new())
        } else if header.procedure == 0 {
            if args.is_empty() {
                (ReplyHeader::success(xid, reply_verifier), Vec::new())
            } else {
                (ReplyHeader::accepted_error(xid, reply_verifier, AcceptError::GarbageArgs), Vec::new())
            }
        } else {
            let call = CallContext { xid, procedure: header.procedure, credential: &header.credential, peer };
            match self.program.dispatch(&call, args) {
                Dispatch::Reply(body) => (ReplyHeader::success(xid, reply_verifier), body),
                Dispatch::ProcUnavail => {
                    (ReplyHeader::accepted_error(xid, reply_verifier, AcceptError::ProcUnavail), Vec::new())
                }
                Dispatch::GarbageArgs => {
                    (ReplyHeader::accepted_error(xid, reply_verifier, AcceptError::GarbageArgs), Vec::new())
                }
                Dispatch::SystemErr => {
                    (ReplyHeader::accepted_error(xid, reply_verifier, AcceptError::SystemErr), Vec::new())
                }
            }
        };

        let mut enc = Encoder::with_capacity(body.len() + 32);
        reply.pack(&mut enc)?;
        enc.raw(&body)?;
        Ok(enc.into_bytes())
    }

    /// Serves calls on one stream until the peer goes away.
    ///
    /// Each record is processed only while `paused` reads `false`.
    pub async fn serve_stream<S: AsyncStream>(
        &self,
        stream: S,
        peer: Option<SocketAddr>,
        mut paused: watch::Receiver<bool>,
    ) {
        let (mut reader, mut writer) = tokio::io::split(stream);
        loop {
            let record = match read_record(&mut reader, self.config.max_record_size).await {
                Ok(record) => record,
                Err(TransportError::ConnectionLost(_)) => {
                    debug!(?peer, "peer closed");
                    break;
                }
                Err(e) => {
                    warn!(?peer, error = %e, "read failed");
                    break;
                }
            };

            let held = *paused.borrow();
            if held {
                warn!(?peer, "suspended, holding request");
            }
            let resumed = paused.wait_for(|paused| !*paused).await.is_ok();
            if !resumed {
                break;
            }

            match self.compute_reply(&record, peer) {
                Ok(reply) => {
                    if let Err(e) = write_record(&mut writer, &reply, self.config.chunk_size).await {
                        warn!(?peer, error = %e, "write failed");
                        break;
                    }
                }
                Err(e) => warn!(?peer, error = %e, "dropping undecodable call"),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Bound, not accepting yet.
    Idle,
    Serving,
    Suspended,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Suspend,
    Resume,
    Shutdown,
}

type CommandMsg = (Command, oneshot::Sender<ServerState>);

/// A bound listener.
pub struct Server {
    listener: TcpListener,
    service: Service,
    state: watch::Sender<ServerState>,
}

impl Server {
    pub async fn bind(addr: impl ToSocketAddrs, service: Service) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (state, _) = watch::channel(ServerState::Idle);
        Ok(Self { listener, service, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Starts the accept loop on its own task.
    pub fn serve(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let (commands, rx) = mpsc::channel(8);
        let state = self.state.subscribe();
        self.state.send_replace(ServerState::Serving);
        info!(%local_addr, "serving");
        let task = tokio::spawn(self.run(rx));
        Ok(ServerHandle { local_addr, commands, state, task })
    }

    async fn run(self, mut commands: mpsc::Receiver<CommandMsg>) {
        let (paused_tx, paused_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some((command, ack)) = command else {
                        break;
                    };
                    let next = match command {
                        Command::Suspend => {
                            paused_tx.send_replace(true);
                            ServerState::Suspended
                        }
                        Command::Resume => {
                            paused_tx.send_replace(false);
                            ServerState::Serving
                        }
                        Command::Shutdown => ServerState::Stopped,
                    };
                    self.state.send_replace(next);
                    info!(?command, state = ?next, "server command");
                    if next == ServerState::Stopped {
                        connections.abort_all();
                        let _ = ack.send(next);
                        break;
                    }
                    let _ = ack.send(next);
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted");
                        let _ = stream.set_nodelay(true);
                        let service = self.service.clone();
                        let paused = paused_rx.clone();
                        connections.spawn(async move {
                            service.serve_stream(stream, Some(peer), paused).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.abort_all();
        self.state.send_replace(ServerState::Stopped);
    }
}

/// Control side of a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    commands: mpsc::Sender<CommandMsg>,
    state: watch::Receiver<ServerState>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Sends a command and waits for the loop to acknowledge it.
    pub async fn command(&self, command: Command) -> Result<ServerState> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send((command, ack))
            .await
            .map_err(|_| Error::Protocol("server loop has stopped".into()))?;
        done.await.map_err(|_| Error::Protocol("server loop dropped the command".into()))
    }

    pub async fn suspend(&self) -> Result<()> {
        self.command(Command::Suspend).await.map(|_| ())
    }

    pub async fn resume(&self) -> Result<()> {
        self.command(Command::Resume).await.map(|_| ())
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        if !self.task.is_finished() {
            self.command(Command::Shutdown).await?;
        }
        self.task
            .await
            .map_err(|e| Error::Protocol(format!("server task failed: {}", e)))
    }
}

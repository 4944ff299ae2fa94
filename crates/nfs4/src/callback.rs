//! # Callback Listener
//!
//! The server calls back into the client to recall delegations and to ask
//! for attributes of files the client holds delegated. This module serves
//! that program on top of `oncrpc::server`.
//!
//! ## Architecture
//!
//! - `RecallRegistry`: per callback ident, an optional one-shot recall
//!   handler, the status it produced, and attributes to answer CB_GETATTR
//!   with. One mutex guards all of it and handlers run under it, so the
//!   foreground path can register and clear without racing the listener.
//! - `CallbackProgram`: decodes CB_COMPOUND and runs its ops in order.
//! - `CallbackListener`: the bound server plus its control handle.

use std::collections::HashMap;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use oncrpc::AuthNone;
use oncrpc::server::CallContext;
use oncrpc::server::Dispatch;
use oncrpc::server::Program;
use oncrpc::server::Server;
use oncrpc::server::ServerHandle;
use oncrpc::server::ServerState;
use oncrpc::server::Service;
use tracing::debug;
use tracing::info;
use tracing::warn;
use xdrpack::Decoder;
use xdrpack::Unpack;

use crate::config::CallbackConfig;
use crate::error::Error;
use crate::error::Result;
use crate::proto::CbArgOp;
use crate::proto::CbCompoundArgs;
use crate::proto::CbCompoundRes;
use crate::proto::CbResBody;
use crate::proto::CbResult;
use crate::proto::ClientAddr;
use crate::proto::Fattr;
use crate::proto::Opcode;
use crate::proto::Stateid;
use crate::proto::Status;
use crate::proto::consts::CB_COMPOUND;
use crate::proto::consts::CB_VERSION;
use crate::session::lock;

/// What the server asked to have back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recall {
    pub callback_ident: u32,
    pub stateid: Stateid,
    pub truncate: bool,
    pub fh: Vec<u8>,
}

/// Runs when a delegation is recalled; its status is what the server sees.
pub type RecallHandler = Box<dyn FnOnce(&Recall) -> Status + Send>;

#[derive(Default)]
struct Registration {
    handler: Option<RecallHandler>,
    last_result: Option<Status>,
    cached_attrs: Option<Fattr>,
}

/// Counters per callback operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallbackStats {
    pub recalls: u64,
    pub getattrs: u64,
    pub illegal: u64,
}

#[derive(Default)]
pub struct RecallRegistry {
    entries: Mutex<HashMap<u32, Registration>>,
    recalls: AtomicU64,
    getattrs: AtomicU64,
    illegal: AtomicU64,
}

impl RecallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `handler` for the next recall under `ident`, replacing any
    /// earlier one and forgetting its result. The handler runs with the
    /// registry locked and must not call back into it.
    pub fn register(&self, ident: u32, handler: impl FnOnce(&Recall) -> Status + Send + 'static) {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(ident).or_default();
        entry.handler = Some(Box::new(handler));
        entry.last_result = None;
    }

    pub fn clear(&self, ident: u32) {
        lock(&self.entries).remove(&ident);
    }

    pub fn is_registered(&self, ident: u32) -> bool {
        lock(&self.entries).get(&ident).is_some_and(|entry| entry.handler.is_some())
    }

    /// The status the handler for `ident` returned, once it has run.
    pub fn last_result(&self, ident: u32) -> Option<Status> {
        lock(&self.entries).get(&ident).and_then(|entry| entry.last_result)
    }

    pub fn set_cached_attrs(&self, ident: u32, attrs: Fattr) {
        lock(&self.entries).entry(ident).or_default().cached_attrs = Some(attrs);
    }

    pub fn stats(&self) -> CallbackStats {
        CallbackStats {
            recalls: self.recalls.load(Ordering::Relaxed),
            getattrs: self.getattrs.load(Ordering::Relaxed),
            illegal: self.illegal.load(Ordering::Relaxed),
        }
    }

    fn recall(&self, recall: &Recall) -> Status {
        self.recalls.fetch_add(1, Ordering::Relaxed);
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(&recall.callback_ident) else {
            debug!(ident = recall.callback_ident, "recall with no registration");
            return Status::OK;
        };
        let Some(handler) = entry.handler.take() else {
            return Status::OK;
        };
        let status = handler(recall);
        entry.last_result = Some(status);
        info!(ident = recall.callback_ident, %status, "delegation recalled");
        status
    }

    fn getattr(&self, ident: u32, request: &[u32]) -> CbResult {
        self.getattrs.fetch_add(1, Ordering::Relaxed);
        let entries = lock(&self.entries);
        let cached = entries.get(&ident).and_then(|entry| entry.cached_attrs.as_ref());
        match cached.map(|attrs| attrs.subset(request)) {
            Some(Ok(attrs)) => CbResult { opcode: Opcode::CB_GETATTR, status: Status::OK, body: CbResBody::Getattr(attrs) },
            Some(Err(e)) => {
                warn!(ident, error = %e, "cached attributes do not decode");
                CbResult::status_only(Opcode::CB_GETATTR, Status::SERVERFAULT)
            }
            None => CbResult::status_only(Opcode::CB_GETATTR, Status::BADHANDLE),
        }
    }
}

/// The callback program, version 1.
pub struct CallbackProgram {
    program: u32,
    registry: Arc<RecallRegistry>,
}

impl CallbackProgram {
    pub fn new(program: u32, registry: Arc<RecallRegistry>) -> Self {
        Self { program, registry }
    }

    /// Runs the ops of one CB_COMPOUND, stopping at the first failure.
    pub fn process(&self, args: &CbCompoundArgs) -> CbCompoundRes {
        let mut res = CbCompoundRes { status: Status::OK, tag: args.tag.clone(), results: Vec::new() };
        if args.minor_version != 0 {
            res.status = Status::MINOR_VERS_MISMATCH;
            return res;
        }

        for op in &args.ops {
            let result = match op {
                CbArgOp::Recall { stateid, truncate, fh } => {
                    let recall = Recall {
                        callback_ident: args.callback_ident,
                        stateid: *stateid,
                        truncate: *truncate,
                        fh: fh.clone(),
                    };
                    CbResult::status_only(Opcode::CB_RECALL, self.registry.recall(&recall))
                }
                CbArgOp::Getattr { attr_request, .. } => self.registry.getattr(args.callback_ident, attr_request),
                CbArgOp::Illegal { opcode } => {
                    self.registry.illegal.fetch_add(1, Ordering::Relaxed);
                    warn!(%opcode, "illegal callback operation");
                    CbResult::status_only(Opcode::CB_ILLEGAL, Status::OP_ILLEGAL)
                }
            };
            res.status = result.status;
            res.results.push(result);
            if !res.status.is_ok() {
                break;
            }
        }
        res
    }

    fn compound(&self, args: &[u8]) -> Dispatch {
        let mut dec = Decoder::new(args);
        let res = match CbCompoundArgs::unpack(&mut dec).and_then(|parsed| dec.done().map(|_| parsed)) {
            Ok(parsed) => self.process(&parsed),
            Err(e) => {
                warn!(error = %e, "undecodable CB_COMPOUND");
                CbCompoundRes { status: Status::BADXDR, tag: String::new(), results: Vec::new() }
            }
        };
        match xdrpack::to_bytes(&res) {
            Ok(body) => Dispatch::Reply(body),
            Err(_) => Dispatch::SystemErr,
        }
    }
}

impl Program for CallbackProgram {
    fn program(&self) -> u32 {
        self.program
    }

    fn version(&self) -> u32 {
        CB_VERSION
    }

    fn dispatch(&self, call: &CallContext<'_>, args: &[u8]) -> Dispatch {
        match call.procedure {
            CB_COMPOUND => self.compound(args),
            _ => Dispatch::ProcUnavail,
        }
    }
}

/// A running callback server.
pub struct CallbackListener {
    handle: ServerHandle,
    program: u32,
    registry: Arc<RecallRegistry>,
}

impl CallbackListener {
    pub async fn start(config: &CallbackConfig, registry: Arc<RecallRegistry>) -> Result<Self> {
        let program = Arc::new(CallbackProgram::new(config.program, registry.clone()));
        let service = Service::new(program, Arc::new(AuthNone));
        let server = Server::bind(config.bind.as_str(), service)
            .await
            .map_err(|e| Error::Listener(format!("bind {}: {}", config.bind, e)))?;
        let handle = server.serve().map_err(|e| Error::Listener(e.to_string()))?;
        info!(addr = %handle.local_addr(), program = config.program, "callback listener up");
        Ok(Self { handle, program: config.program, registry })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn program(&self) -> u32 {
        self.program
    }

    pub fn registry(&self) -> &Arc<RecallRegistry> {
        &self.registry
    }

    pub fn state(&self) -> ServerState {
        self.handle.state()
    }

    pub async fn suspend(&self) -> Result<()> {
        self.handle.suspend().await.map_err(|e| Error::Listener(e.to_string()))
    }

    pub async fn resume(&self) -> Result<()> {
        self.handle.resume().await.map_err(|e| Error::Listener(e.to_string()))
    }

    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await.map_err(|e| Error::Listener(e.to_string()))
    }

    /// The address to advertise, substituting `host` when bound to a
    /// wildcard address.
    pub fn client_addr(&self, host: Option<IpAddr>) -> ClientAddr {
        let local = self.local_addr();
        let ip = match host {
            Some(ip) => ip,
            None => local.ip(),
        };
        universal_address(SocketAddr::new(ip, local.port()))
    }
}

/// `clientaddr4` for a socket address: `h1.h2.h3.h4.p1.p2` over `tcp`, or
/// the IPv6 text form plus the port bytes over `tcp6`.
pub fn universal_address(addr: SocketAddr) -> ClientAddr {
    let port = addr.port();
    let (netid, host) = match addr.ip() {
        IpAddr::V4(ip) => ("tcp", ip.to_string()),
        IpAddr::V6(ip) => ("tcp6", ip.to_string()),
    };
    ClientAddr { netid: netid.into(), addr: format!("{}.{}.{}", host, port >> 8, port & 0xff) }
}

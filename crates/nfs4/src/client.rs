//! # NFSv4 Client
//!
//! `Nfs4Client` sends COMPOUND procedures, validates what comes back, and
//! keeps the session state that stateful operations depend on.
//!
//! ## Philosophy
//!
//! `compound` is the primitive: any list of operations in, a validated reply
//! out, with a failing status returned as data. The helpers built on it
//! (`open_file`, `lock_file`, ...) take care of filehandle prologues, seqids
//! and recall registration, and leave it to `check_result` to decide whether
//! a failing status is an error for the caller.
//!
//! ## Seqids
//!
//! Every helper that sends an owner's seqid reads it right before building
//! the compound and advances it exactly once afterwards, with whatever
//! status the server returned, even when the reply broke the compound rules.
//! A transport or RPC failure leaves it untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use oncrpc::RpcClient;
use oncrpc::connection::Connector;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::callback::CallbackListener;
use crate::callback::Recall;
use crate::callback::RecallHandler;
use crate::callback::RecallRegistry;
use crate::compound::validate;
use crate::config::ClientConfig;
use crate::error::BadStatus;
use crate::error::Error;
use crate::error::Result;
use crate::proto::ArgOp;
use crate::proto::CbClient;
use crate::proto::ClientAddr;
use crate::proto::ClientId;
use crate::proto::CompoundArgs;
use crate::proto::CompoundRes;
use crate::proto::CreateHow;
use crate::proto::Fattr;
use crate::proto::Locker;
use crate::proto::OpenClaim;
use crate::proto::OpenDelegation;
use crate::proto::OpenHow;
use crate::proto::Opcode;
use crate::proto::ResBody;
use crate::proto::StateOwner;
use crate::proto::Stateid;
use crate::proto::Status;
use crate::proto::attr::AttrValue;
use crate::proto::attr::FATTR4_MODE;
use crate::proto::attr::list_to_mask;
use crate::proto::consts::*;
use crate::session::ClientIdentity;
use crate::session::OwnerKey;
use crate::session::SessionState;

/// Turns a failing compound into `Error::Status`, naming the last op run.
pub fn check_result(res: &CompoundRes, message: &str) -> Result<()> {
    if res.status.is_ok() {
        return Ok(());
    }
    Err(Error::Status(BadStatus {
        opcode: res.last().map(|last| last.opcode),
        status: res.status,
        message: message.to_string(),
    }))
}

/// PUTROOTFH followed by one LOOKUP per component.
pub fn use_path<S: AsRef<str>>(path: &[S]) -> Vec<ArgOp> {
    let mut ops = Vec::with_capacity(path.len() + 1);
    ops.push(ArgOp::Putrootfh);
    ops.extend(path.iter().map(|part| ArgOp::Lookup { objname: part.as_ref().to_string() }));
    ops
}

/// How an OPEN is sent.
pub struct OpenOptions {
    pub access: u32,
    pub deny: u32,
    /// `None` opens an existing file.
    pub create: Option<CreateHow>,
    recall: Option<RecallHandler>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self { access: OPEN4_SHARE_ACCESS_READ, deny: OPEN4_SHARE_DENY_NONE, create: None, recall: None }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guarded create with mode 0644, opened for read and write, denying
    /// other writers.
    pub fn create_default() -> Result<Self> {
        let mut attrs = BTreeMap::new();
        attrs.insert(FATTR4_MODE, AttrValue::U32(0o644));
        Ok(Self::new()
            .access(OPEN4_SHARE_ACCESS_BOTH)
            .deny(OPEN4_SHARE_DENY_WRITE)
            .create(CreateHow::Guarded(Fattr::from_values(&attrs)?)))
    }

    pub fn access(mut self, access: u32) -> Self {
        self.access = access;
        self
    }

    pub fn deny(mut self, deny: u32) -> Self {
        self.deny = deny;
        self
    }

    pub fn create(mut self, how: CreateHow) -> Self {
        self.create = Some(how);
        self
    }

    /// Registers `handler` for a recall of the delegation this open may be
    /// granted.
    pub fn recall(mut self, handler: impl FnOnce(&Recall) -> Status + Send + 'static) -> Self {
        self.recall = Some(Box::new(handler));
        self
    }
}

/// A byte range to lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRange {
    pub locktype: LockType,
    pub offset: u64,
    pub length: u64,
}

impl LockRange {
    pub fn new(locktype: LockType, offset: u64, length: u64) -> Self {
        Self { locktype, offset, length }
    }

    /// From `offset` to the end of the file.
    pub fn to_end(locktype: LockType, offset: u64) -> Self {
        Self { locktype, offset, length: u64::MAX }
    }
}

/// An open file after OPEN and, where required, OPEN_CONFIRM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedFile {
    pub owner: String,
    pub fh: Vec<u8>,
    pub stateid: Stateid,
    pub delegation: OpenDelegation,
}

pub struct Nfs4Client {
    config: ClientConfig,
    rpc: RpcClient,
    session: SessionState,
    registry: Arc<RecallRegistry>,
    listener: Option<CallbackListener>,
}

impl Nfs4Client {
    /// Dials the server over TCP and starts the callback listener when one
    /// is configured.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let rpc = RpcClient::connect(config.server_addr(), rpc_config(&config), config.security_flavor()).await?;
        Self::with_rpc(config, rpc).await
    }

    /// Like `connect`, through an arbitrary connector.
    pub async fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let rpc = RpcClient::with_connector(connector, rpc_config(&config), config.security_flavor()).await?;
        Self::with_rpc(config, rpc).await
    }

    pub async fn with_rpc(config: ClientConfig, rpc: RpcClient) -> Result<Self> {
        let registry = Arc::new(RecallRegistry::new());
        let listener = match &config.callback {
            Some(callback) => Some(CallbackListener::start(callback, registry.clone()).await?),
            None => None,
        };
        let session = SessionState::new(ClientIdentity::new(config.client_id.clone()));
        Ok(Self { config, rpc, session, registry, listener })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn registry(&self) -> &Arc<RecallRegistry> {
        &self.registry
    }

    pub fn listener(&self) -> Option<&CallbackListener> {
        self.listener.as_ref()
    }

    /// Stops the callback listener.
    pub async fn shutdown(self) -> Result<()> {
        match self.listener {
            Some(listener) => listener.shutdown().await,
            None => Ok(()),
        }
    }

    pub async fn null(&self) -> Result<()> {
        Ok(self.rpc.null().await?)
    }

    /// Sends `ops` as one COMPOUND and validates the reply.
    pub async fn compound(&self, ops: Vec<ArgOp>, tag: &str) -> Result<CompoundRes> {
        let requested: Vec<Opcode> = ops.iter().map(ArgOp::opcode).collect();
        let args = CompoundArgs { tag: tag.to_string(), minor_version: self.config.minor_version, ops };
        let payload = xdrpack::to_bytes(&args)?;

        let reply = self.rpc.call(NFSPROC4_COMPOUND, &payload).await?;
        let res: CompoundRes = xdrpack::from_bytes(&reply)?;
        debug!(tag, ops = requested.len(), results = res.results.len(), status = %res.status, "compound");

        if let Err(e) = validate(&requested, &res) {
            warn!(tag, reason = %e.reason, "invalid compound reply");
            return Err(e.into());
        }
        Ok(res)
    }

    /// `compound`, then one seqid advance per owner with the status obtained.
    async fn seq_compound(&self, ops: Vec<ArgOp>, tag: &str, owners: &[OwnerKey]) -> Result<CompoundRes> {
        let outcome = self.compound(ops, tag).await;
        let status = match &outcome {
            Ok(res) => Some(res.status),
            Err(Error::InvalidCompound(e)) => Some(e.status),
            Err(_) => None,
        };
        if let Some(status) = status {
            for owner in owners {
                self.session.advance_sequence(owner, status);
            }
        }
        outcome
    }

    // ========================================================================
    // Client id negotiation
    // ========================================================================

    /// SETCLIENTID with the configured id and a fresh verifier, then
    /// SETCLIENTID_CONFIRM. Any earlier client id is forgotten first.
    pub async fn init(&self) -> Result<u64> {
        let identity = self.session.update_identity(|identity| {
            identity.regenerate();
            identity.clone()
        });
        self.negotiate_identity(&identity.id, identity.verifier).await
    }

    /// Establishes and confirms a client id, advertising the callback
    /// listener when there is one. Returns the client id.
    pub async fn negotiate_identity(&self, id: &str, verifier: [u8; NFS4_VERIFIER_SIZE]) -> Result<u64> {
        let callback_ident = self.session.next_callback_ident();
        let callback = self.callback_client();
        self.session.update_identity(|identity| *identity = ClientIdentity::with_verifier(id, verifier));

        let ops = vec![ArgOp::Setclientid {
            client: ClientId { verifier, id: id.as_bytes().to_vec() },
            callback,
            callback_ident,
        }];
        let res = self.compound(ops, "setclientid").await?;
        check_result(&res, "SETCLIENTID")?;
        let (clientid, confirm) = match res.last().map(|last| &last.body) {
            Some(ResBody::Setclientid { clientid, confirm }) => (*clientid, *confirm),
            other => return Err(Error::UnexpectedResult(format!("SETCLIENTID returned {:?}", other))),
        };
        self.session.update_identity(|identity| {
            identity.clientid = Some(clientid);
            identity.confirm = Some(confirm);
        });

        let confirm_op = || vec![ArgOp::SetclientidConfirm { clientid, confirm }];
        let mut res = self.compound(confirm_op(), "setclientid_confirm").await?;
        if res.status == Status::RESOURCE || res.status == Status::DELAY {
            warn!(status = %res.status, "retrying SETCLIENTID_CONFIRM");
            res = self.compound(confirm_op(), "setclientid_confirm").await?;
        }
        check_result(&res, "SETCLIENTID_CONFIRM")?;

        self.session.update_identity(|identity| identity.confirmed = true);
        info!(id, clientid, callback_ident, "client id confirmed");
        Ok(clientid)
    }

    fn callback_client(&self) -> CbClient {
        let Some(listener) = &self.listener else {
            return CbClient { program: DEFAULT_CB_PROGRAM, location: ClientAddr::null() };
        };
        let advertise = self.config.callback.as_ref().and_then(|callback| callback.advertise);
        let host = advertise.or_else(|| {
            let bound = listener.local_addr().ip();
            if bound.is_unspecified() { self.rpc.local_addr().map(|addr| addr.ip()) } else { None }
        });
        CbClient { program: listener.program(), location: listener.client_addr(host) }
    }

    /// Fails with `NotConfirmed` until the client id is confirmed.
    fn require_confirmed(&self) -> Result<u64> {
        self.session.clientid()
    }

    // ========================================================================
    // Filehandles and attributes
    // ========================================================================

    /// Operations that make the configured home directory current.
    pub fn go_home(&self) -> Vec<ArgOp> {
        use_path(&self.config.homedir)
    }

    pub async fn get_fh<S: AsRef<str>>(&self, path: &[S]) -> Result<Vec<u8>> {
        let mut ops = use_path(path);
        ops.push(ArgOp::Getfh);
        let res = self.compound(ops, "get_fh").await?;
        check_result(&res, "looking up filehandle")?;
        res.last()
            .and_then(|last| last.filehandle())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::UnexpectedResult("GETFH returned no filehandle".into()))
    }

    /// GETATTR on `fh`, decoded into typed values keyed by attribute bit.
    pub async fn getattr_values(&self, fh: &[u8], attrs: &[u32]) -> Result<BTreeMap<u32, AttrValue>> {
        let ops = vec![ArgOp::Putfh { object: fh.to_vec() }, ArgOp::Getattr { attr_request: list_to_mask(attrs) }];
        let res = self.compound(ops, "getattr").await?;
        check_result(&res, "GETATTR")?;
        match res.last().map(|last| &last.body) {
            Some(ResBody::Getattr(fattr)) => Ok(fattr.values()?),
            other => Err(Error::UnexpectedResult(format!("GETATTR returned {:?}", other))),
        }
    }

    // ========================================================================
    // Open state
    // ========================================================================

    /// OPEN (optionally creating) the last component of `path`, followed by
    /// GETFH. The reply is returned as is.
    pub async fn open_with<S: AsRef<str>>(&self, owner: &str, path: &[S], options: OpenOptions) -> Result<CompoundRes> {
        let clientid = self.require_confirmed()?;
        let (name, dir) = match path.split_last() {
            Some((name, dir)) => (name.as_ref().to_string(), dir),
            None => (String::new(), path),
        };
        let key = OwnerKey::open(owner);

        let mut ops = use_path(dir);
        ops.push(ArgOp::Open {
            seqid: self.session.next_sequence(&key),
            share_access: options.access,
            share_deny: options.deny,
            owner: StateOwner { clientid, owner: owner.as_bytes().to_vec() },
            openhow: match options.create {
                Some(how) => OpenHow::Create(how),
                None => OpenHow::NoCreate,
            },
            claim: OpenClaim::Null(name),
        });
        ops.push(ArgOp::Getfh);

        let ident = self.session.current_callback_ident();
        let armed = match options.recall {
            Some(handler) => {
                self.registry.register(ident, handler);
                true
            }
            None => false,
        };

        let outcome = self.seq_compound(ops, "open", &[key]).await;
        if armed {
            let delegated = match &outcome {
                Ok(res) if res.status.is_ok() => open_result(res).is_some_and(|(_, _, deleg)| *deleg != OpenDelegation::None),
                _ => false,
            };
            if !delegated {
                self.registry.clear(ident);
            }
        }
        outcome
    }

    pub async fn open_file<S: AsRef<str>>(&self, owner: &str, path: &[S]) -> Result<CompoundRes> {
        self.open_with(owner, path, OpenOptions::new()).await
    }

    pub async fn create_file<S: AsRef<str>>(&self, owner: &str, path: &[S]) -> Result<CompoundRes> {
        self.open_with(owner, path, OpenOptions::create_default()?).await
    }

    /// Completes an OPEN reply: sends OPEN_CONFIRM when the server asked
    /// for it and returns the resulting state.
    pub async fn confirm_open(&self, owner: &str, res: &CompoundRes) -> Result<OpenedFile> {
        self.require_confirmed()?;
        check_result(res, "OPEN")?;
        let (stateid, rflags, delegation) = open_result(res)
            .map(|(stateid, rflags, delegation)| (stateid, rflags, delegation.clone()))
            .ok_or_else(|| Error::UnexpectedResult("reply has no OPEN result".into()))?;
        let fh = res
            .find(Opcode::GETFH)
            .and_then(|getfh| getfh.filehandle())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::UnexpectedResult("reply has no GETFH result".into()))?;

        let mut opened = OpenedFile { owner: owner.to_string(), fh, stateid, delegation };
        if rflags & OPEN4_RESULT_CONFIRM != 0 {
            let key = OwnerKey::open(owner);
            let ops = vec![
                ArgOp::Putfh { object: opened.fh.clone() },
                ArgOp::OpenConfirm { open_stateid: stateid, seqid: self.session.next_sequence(&key) },
            ];
            let res = self.seq_compound(ops, "open_confirm", &[key]).await?;
            check_result(&res, "OPEN_CONFIRM")?;
            opened.stateid = res
                .last()
                .and_then(|last| last.stateid())
                .ok_or_else(|| Error::UnexpectedResult("OPEN_CONFIRM returned no stateid".into()))?;
        }
        Ok(opened)
    }

    pub async fn create_confirm<S: AsRef<str>>(&self, owner: &str, path: &[S]) -> Result<OpenedFile> {
        let res = self.create_file(owner, path).await?;
        self.confirm_open(owner, &res).await
    }

    pub async fn open_confirm<S: AsRef<str>>(&self, owner: &str, path: &[S]) -> Result<OpenedFile> {
        let res = self.open_file(owner, path).await?;
        self.confirm_open(owner, &res).await
    }

    pub async fn downgrade_file(&self, owner: &str, fh: &[u8], stateid: Stateid, access: u32, deny: u32) -> Result<CompoundRes> {
        self.require_confirmed()?;
        let key = OwnerKey::open(owner);
        let ops = vec![
            ArgOp::Putfh { object: fh.to_vec() },
            ArgOp::OpenDowngrade {
                open_stateid: stateid,
                seqid: self.session.next_sequence(&key),
                share_access: access,
                share_deny: deny,
            },
        ];
        self.seq_compound(ops, "open_downgrade", &[key]).await
    }

    pub async fn close_file(&self, owner: &str, fh: &[u8], stateid: Stateid) -> Result<CompoundRes> {
        self.require_confirmed()?;
        let key = OwnerKey::open(owner);
        let ops = vec![
            ArgOp::Putfh { object: fh.to_vec() },
            ArgOp::Close { seqid: self.session.next_sequence(&key), open_stateid: stateid },
        ];
        self.seq_compound(ops, "close", &[key]).await
    }

    // ========================================================================
    // Byte-range locks
    // ========================================================================

    /// First LOCK by a lock owner, taken through an open. Without an
    /// explicit owner a time-based one is made up.
    pub async fn lock_file(
        &self,
        open_owner: &str,
        fh: &[u8],
        open_stateid: Stateid,
        range: LockRange,
        lock_owner: Option<&str>,
    ) -> Result<CompoundRes> {
        let clientid = self.require_confirmed()?;
        let lock_owner = match lock_owner {
            Some(owner) => owner.to_string(),
            None => default_lock_owner(),
        };
        let open_key = OwnerKey::open(open_owner);
        let lock_key = OwnerKey::lock(lock_owner.as_bytes());
        let ops = vec![
            ArgOp::Putfh { object: fh.to_vec() },
            ArgOp::Lock {
                locktype: range.locktype,
                reclaim: false,
                offset: range.offset,
                length: range.length,
                locker: Locker::New {
                    open_seqid: self.session.next_sequence(&open_key),
                    open_stateid,
                    lock_seqid: self.session.next_sequence(&lock_key),
                    lock_owner: StateOwner { clientid, owner: lock_owner.into_bytes() },
                },
            },
        ];
        self.seq_compound(ops, "lock", &[open_key, lock_key]).await
    }

    /// A further LOCK by an owner that already holds `lock_stateid`.
    pub async fn relock_file(&self, lock_owner: &str, fh: &[u8], lock_stateid: Stateid, range: LockRange) -> Result<CompoundRes> {
        self.require_confirmed()?;
        let key = OwnerKey::lock(lock_owner);
        let ops = vec![
            ArgOp::Putfh { object: fh.to_vec() },
            ArgOp::Lock {
                locktype: range.locktype,
                reclaim: false,
                offset: range.offset,
                length: range.length,
                locker: Locker::Existing { lock_stateid, lock_seqid: self.session.next_sequence(&key) },
            },
        ];
        self.seq_compound(ops, "relock", &[key]).await
    }

    pub async fn unlock_file(&self, lock_owner: &str, fh: &[u8], lock_stateid: Stateid, range: LockRange) -> Result<CompoundRes> {
        self.require_confirmed()?;
        let key = OwnerKey::lock(lock_owner);
        let ops = vec![
            ArgOp::Putfh { object: fh.to_vec() },
            ArgOp::Locku {
                locktype: range.locktype,
                seqid: self.session.next_sequence(&key),
                lock_stateid,
                offset: range.offset,
                length: range.length,
            },
        ];
        self.seq_compound(ops, "unlock", &[key]).await
    }

    /// LOCKT. Carries no seqid.
    pub async fn lock_test(&self, lock_owner: &str, fh: &[u8], range: LockRange) -> Result<CompoundRes> {
        let clientid = self.require_confirmed()?;
        let ops = vec![
            ArgOp::Putfh { object: fh.to_vec() },
            ArgOp::Lockt {
                locktype: range.locktype,
                offset: range.offset,
                length: range.length,
                owner: StateOwner { clientid, owner: lock_owner.as_bytes().to_vec() },
            },
        ];
        self.compound(ops, "lockt").await
    }

    // ========================================================================
    // Data
    // ========================================================================

    /// READ, with the anonymous stateid unless one is given.
    pub async fn read_file(&self, fh: &[u8], offset: u64, count: u32, stateid: Option<Stateid>) -> Result<CompoundRes> {
        let ops = vec![
            ArgOp::Putfh { object: fh.to_vec() },
            ArgOp::Read { stateid: stateid.unwrap_or(Stateid::ANONYMOUS), offset, count },
        ];
        self.compound(ops, "read").await
    }

    pub async fn write_file(
        &self,
        fh: &[u8],
        data: Vec<u8>,
        offset: u64,
        stateid: Option<Stateid>,
        stable: StableHow,
    ) -> Result<CompoundRes> {
        let ops = vec![
            ArgOp::Putfh { object: fh.to_vec() },
            ArgOp::Write { stateid: stateid.unwrap_or(Stateid::ANONYMOUS), offset, stable, data },
        ];
        self.compound(ops, "write").await
    }

    pub async fn commit_file(&self, fh: &[u8], offset: u64, count: u32) -> Result<CompoundRes> {
        let ops = vec![ArgOp::Putfh { object: fh.to_vec() }, ArgOp::Commit { offset, count }];
        self.compound(ops, "commit").await
    }

    /// REMOVE the last component of `path` from its parent.
    pub async fn remove<S: AsRef<str>>(&self, path: &[S]) -> Result<CompoundRes> {
        let (target, dir) = match path.split_last() {
            Some((name, dir)) => (name.as_ref().to_string(), dir),
            None => (String::new(), path),
        };
        let mut ops = use_path(dir);
        ops.push(ArgOp::Remove { target });
        self.compound(ops, "remove").await
    }

    pub async fn renew(&self) -> Result<CompoundRes> {
        let clientid = self.require_confirmed()?;
        self.compound(vec![ArgOp::Renew { clientid }], "renew").await
    }

    pub async fn delegreturn(&self, fh: &[u8], stateid: Stateid) -> Result<CompoundRes> {
        let ops = vec![ArgOp::Putfh { object: fh.to_vec() }, ArgOp::Delegreturn { deleg_stateid: stateid }];
        self.compound(ops, "delegreturn").await
    }
}

fn rpc_config(config: &ClientConfig) -> oncrpc::ClientConfig {
    oncrpc::ClientConfig::new(NFS4_PROGRAM, NFS4_VERSION).connection(config.connection.clone())
}

fn open_result(res: &CompoundRes) -> Option<(Stateid, u32, &OpenDelegation)> {
    match res.find(Opcode::OPEN).map(|open| &open.body) {
        Some(ResBody::Open(ok)) => Some((ok.stateid, ok.rflags, &ok.delegation)),
        _ => None,
    }
}

fn default_lock_owner() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("lockowner_{}", nanos)
}

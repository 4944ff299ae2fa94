//! # Session State
//!
//! Long-lived client state: the negotiated client id, the per-owner seqids
//! that OPEN/CLOSE/LOCK-family operations must carry, and the callback
//! identifiers handed to the server.
//!
//! ## Philosophy
//!
//! The server bumps an owner's seqid whenever it processes a seqid-bearing
//! operation, except for a handful of errors that tell us it never looked at
//! the seqid. The tracker mirrors that: one advance per issued compound,
//! skipped for `NON_ADVANCING` statuses, and never guessed when no status
//! came back at all.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tracing::debug;

use crate::error::Error;
use crate::error::Result;
use crate::proto::Status;
use crate::proto::consts::NFS4_VERIFIER_SIZE;

/// Statuses after which the server has not consumed the seqid.
pub const NON_ADVANCING: &[Status] = &[
    Status::STALE_CLIENTID,
    Status::STALE_STATEID,
    Status::BAD_STATEID,
    Status::BAD_SEQID,
    Status::BADXDR,
    Status::RESOURCE,
    Status::NOFILEHANDLE,
];

pub fn advances(status: Status) -> bool {
    !NON_ADVANCING.contains(&status)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    Open,
    Lock,
}

/// An open-owner or lock-owner, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerKey {
    pub kind: OwnerKind,
    pub name: Vec<u8>,
}

impl OwnerKey {
    pub fn open(name: impl Into<Vec<u8>>) -> Self {
        Self { kind: OwnerKind::Open, name: name.into() }
    }

    pub fn lock(name: impl Into<Vec<u8>>) -> Self {
        Self { kind: OwnerKind::Lock, name: name.into() }
    }
}

/// A verifier that changes whenever the client restarts.
pub fn time_verifier() -> [u8; NFS4_VERIFIER_SIZE] {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    nanos.to_be_bytes()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub verifier: [u8; NFS4_VERIFIER_SIZE],
    pub id: String,
    pub clientid: Option<u64>,
    pub confirm: Option<[u8; NFS4_VERIFIER_SIZE]>,
    pub confirmed: bool,
}

impl ClientIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_verifier(id, time_verifier())
    }

    pub fn with_verifier(id: impl Into<String>, verifier: [u8; NFS4_VERIFIER_SIZE]) -> Self {
        Self { verifier, id: id.into(), clientid: None, confirm: None, confirmed: false }
    }

    /// Starts over as a rebooted client would.
    pub fn regenerate(&mut self) {
        self.verifier = time_verifier();
        self.clientid = None;
        self.confirm = None;
        self.confirmed = false;
    }
}

/// Recovers the guard of a poisoned lock; the protected maps stay
/// consistent between statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
pub struct SessionState {
    identity: Mutex<ClientIdentity>,
    sequences: Mutex<HashMap<OwnerKey, u32>>,
    callback_ident: AtomicU32,
}

impl SessionState {
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            identity: Mutex::new(identity),
            sequences: Mutex::new(HashMap::new()),
            callback_ident: AtomicU32::new(0),
        }
    }

    pub fn identity(&self) -> ClientIdentity {
        lock(&self.identity).clone()
    }

    pub fn update_identity<R>(&self, f: impl FnOnce(&mut ClientIdentity) -> R) -> R {
        f(&mut lock(&self.identity))
    }

    pub fn is_confirmed(&self) -> bool {
        lock(&self.identity).confirmed
    }

    /// The confirmed client id, or `NotConfirmed`.
    pub fn clientid(&self) -> Result<u64> {
        let identity = lock(&self.identity);
        match identity.clientid {
            Some(clientid) if identity.confirmed => Ok(clientid),
            _ => Err(Error::NotConfirmed),
        }
    }

    /// The seqid to put in the next request for `owner`. Starts at 0.
    pub fn next_sequence(&self, owner: &OwnerKey) -> u32 {
        *lock(&self.sequences).entry(owner.clone()).or_insert(0)
    }

    /// Records that a compound carrying `owner`'s seqid completed with
    /// `status`. Returns whether the seqid moved.
    pub fn advance_sequence(&self, owner: &OwnerKey, status: Status) -> bool {
        if !advances(status) {
            debug!(kind = ?owner.kind, %status, "seqid held");
            return false;
        }
        let mut sequences = lock(&self.sequences);
        let seqid = sequences.entry(owner.clone()).or_insert(0);
        *seqid = seqid.wrapping_add(1);
        true
    }

    #[cfg(test)]
    pub(crate) fn set_sequence(&self, owner: &OwnerKey, seqid: u32) {
        lock(&self.sequences).insert(owner.clone(), seqid);
    }

    /// Hands out a fresh callback identifier, starting at 1.
    pub fn next_callback_ident(&self) -> u32 {
        self.callback_ident.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// The identifier most recently handed out, 0 before the first.
    pub fn current_callback_ident(&self) -> u32 {
        self.callback_ident.load(Ordering::SeqCst)
    }
}

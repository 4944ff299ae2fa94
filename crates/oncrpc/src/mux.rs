//! # Call Multiplexer
//!
//! Correlates replies with outstanding calls by xid.
//!
//! There is no background pump. Whoever is waiting and manages to take the
//! read half becomes the reader: it reads records until its own reply shows
//! up, parking replies that belong to other outstanding calls in the table
//! and waking their owners. Everyone else sleeps until either the read half
//! frees up or their reply has been parked.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;
use tracing::debug;
use tracing::warn;

use crate::connection::Connection;
use crate::error::Error;
use crate::error::Result;
use crate::error::TransportError;
use crate::message::peek_xid;

/// An outstanding call, kept until its reply is handed out.
struct PendingCall {
    request: Vec<u8>,
    /// Security sequence the request was secured with.
    sequence: u32,
    reply: Option<Vec<u8>>,
    resent: bool,
}

/// A reply record handed back to the caller that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub xid: u32,
    pub record: Vec<u8>,
    pub sequence: u32,
}

pub struct Multiplexer {
    connection: Connection,
    pending: DashMap<u32, PendingCall>,
    xid_gen: AtomicU32,
    arrived: Notify,
}

impl Multiplexer {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            pending: DashMap::new(),
            xid_gen: AtomicU32::new(1),
            arrived: Notify::new(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Hands out xids starting at 1, wrapping from `u32::MAX` to 0.
    pub fn next_xid(&self) -> u32 {
        self.xid_gen.fetch_add(1, Ordering::Relaxed)
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Registers `request` under `xid` and writes it.
    ///
    /// On a transport failure the connection is re-established once and every
    /// unreplied request, this one included, is written again.
    pub async fn send(&self, xid: u32, request: Vec<u8>, sequence: u32) -> Result<()> {
        match self.pending.entry(xid) {
            Entry::Occupied(_) => return Err(Error::DuplicateXid(xid)),
            Entry::Vacant(slot) => {
                slot.insert(PendingCall { request: request.clone(), sequence, reply: None, resent: false });
            }
        }

        let epoch = self.connection.epoch();
        match self.connection.send(&request).await {
            Ok(()) => Ok(()),
            Err(TransportError::Timeout) => {
                self.pending.remove(&xid);
                Err(TransportError::Timeout.into())
            }
            Err(e) => {
                warn!(xid, error = %e, "send failed");
                self.recover(epoch).await.inspect_err(|_| {
                    self.pending.remove(&xid);
                })
            }
        }
    }

    /// Waits for the reply to `xid`.
    pub async fn wait(&self, xid: u32) -> Result<Delivered> {
        if !self.pending.contains_key(&xid) {
            return Err(Error::UnknownXid(xid));
        }

        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivered) = self.take_parked(xid) {
                return Ok(delivered);
            }

            let mut reader = tokio::select! {
                reader = self.connection.lock_reader() => reader,
                _ = &mut notified => continue,
            };

            // A previous reader may have parked our reply while we queued.
            if let Some(delivered) = self.take_parked(xid) {
                return Ok(delivered);
            }

            let epoch = self.connection.epoch();
            let received = reader.receive().await;
            drop(reader);

            match received {
                Ok(record) => {
                    if let Some(delivered) = self.route(xid, record)? {
                        return Ok(delivered);
                    }
                }
                Err(TransportError::Timeout) => {
                    self.pending.remove(&xid);
                    return Err(TransportError::Timeout.into());
                }
                Err(e) => {
                    let resent = self.pending.get(&xid).is_none_or(|call| call.resent);
                    if resent {
                        self.pending.remove(&xid);
                        return Err(e.into());
                    }
                    warn!(xid, error = %e, "receive failed");
                    if let Err(e) = self.recover(epoch).await {
                        self.pending.remove(&xid);
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Dispatches one received record. Returns it if it is the reply to `xid`.
    fn route(&self, xid: u32, record: Vec<u8>) -> Result<Option<Delivered>> {
        let received = match peek_xid(&record) {
            Ok(received) => received,
            Err(e) => {
                self.pending.remove(&xid);
                return Err(e.into());
            }
        };

        if received == xid {
            let Some((_, call)) = self.pending.remove(&xid) else {
                return Err(Error::UnknownXid(xid));
            };
            debug!(xid, len = record.len(), "reply");
            return Ok(Some(Delivered { xid, record, sequence: call.sequence }));
        }

        match self.pending.get_mut(&received) {
            Some(mut call) => {
                debug!(xid = received, reader = xid, "parking reply");
                call.reply = Some(record);
                drop(call);
                self.arrived.notify_waiters();
                Ok(None)
            }
            None => {
                warn!(received, expected = xid, "reply for an xid nobody is waiting on");
                self.pending.remove(&xid);
                Err(Error::UnexpectedReply { received, expected: xid })
            }
        }
    }

    fn take_parked(&self, xid: u32) -> Option<Delivered> {
        let (_, call) = self.pending.remove_if(&xid, |_, call| call.reply.is_some())?;
        let record = call.reply?;
        Some(Delivered { xid, record, sequence: call.sequence })
    }

    /// Reconnects (unless someone already did since `epoch`) and writes every
    /// unreplied request that has not been written twice yet.
    async fn recover(&self, epoch: u64) -> Result<()> {
        if self.connection.reconnect_if(epoch).await? {
            debug!(epoch, "reconnected");
        }

        let resend: Vec<(u32, Vec<u8>)> = self
            .pending
            .iter_mut()
            .filter(|call| call.reply.is_none() && !call.resent)
            .map(|mut call| {
                call.resent = true;
                (*call.key(), call.request.clone())
            })
            .collect();

        for (xid, request) in resend {
            warn!(xid, "resending");
            self.connection.send(&request).await?;
        }
        Ok(())
    }
}

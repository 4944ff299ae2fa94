//! The compound engine and session tracking against a scripted server over
//! duplex pipes.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use nfs4::ClientConfig;
use nfs4::Error;
use nfs4::LockRange;
use nfs4::Nfs4Client;
use nfs4::OpenOptions;
use nfs4::OwnerKey;
use nfs4::proto::consts::*;
use nfs4::proto::ops::OpenOk;
use nfs4::proto::*;
use oncrpc::message::RejectReason;
use oncrpc::message::ReplyHeader;
use oncrpc::mock_stream::DuplexConnector;
use oncrpc::mock_stream::ReceivedCall;
use oncrpc::mock_stream::StubPeer;
use tokio::io::DuplexStream;
use xdrpack::Decoder;

const VERIFIER: [u8; 8] = *b"verifier";
const CLIENTID: u64 = 0x1122_3344_5566_7788;
const CONFIRM: [u8; 8] = *b"confirm!";

type Peer = StubPeer<DuplexStream>;

async fn setup() -> anyhow::Result<(Arc<Nfs4Client>, Peer)> {
    let (connector, mut acceptor) = DuplexConnector::pair();
    let config = ClientConfig::new("stub").callback(None).timeout(Duration::from_secs(5));
    let client = Nfs4Client::with_connector(config, Arc::new(connector)).await?;
    let peer = acceptor.accept().await.expect("dialed");
    Ok((Arc::new(client), peer))
}

/// Checks the COMPOUND envelope and returns a decoder at its first op.
fn compound_ops<'a>(call: &'a ReceivedCall, expected: &[Opcode]) -> anyhow::Result<Decoder<'a>> {
    assert_eq!(call.header.program, NFS4_PROGRAM);
    assert_eq!(call.header.version, NFS4_VERSION);
    assert_eq!(call.header.procedure, NFSPROC4_COMPOUND);
    let mut dec = Decoder::new(&call.args);
    dec.string()?;
    assert_eq!(dec.u32()?, 0, "minor version");
    assert_eq!(dec.u32()? as usize, expected.len(), "op count");
    let first = call.args.get(dec.position()..dec.position() + 4).expect("first opcode");
    assert_eq!(u32::from_be_bytes(first.try_into()?), expected[0].0);
    Ok(dec)
}

async fn reply(peer: &mut Peer, xid: u32, status: Status, results: Vec<OpResult>) -> anyhow::Result<()> {
    let res = CompoundRes { status, tag: String::new(), results };
    peer.reply(xid, &xdrpack::to_bytes(&res)?).await?;
    Ok(())
}

fn ok(opcode: Opcode) -> OpResult {
    OpResult::status_only(opcode, Status::OK)
}

fn confirm(client: &Nfs4Client) {
    client.session().update_identity(|identity| {
        identity.clientid = Some(CLIENTID);
        identity.confirmed = true;
    });
}

fn open_ok(stateid: Stateid, rflags: u32, delegation: OpenDelegation) -> OpResult {
    OpResult::new(
        Opcode::OPEN,
        Status::OK,
        ResBody::Open(OpenOk { stateid, cinfo: ChangeInfo::default(), rflags, attrset: vec![], delegation }),
    )
}

fn read_delegation() -> OpenDelegation {
    OpenDelegation::Read {
        stateid: Stateid { seqid: 1, other: [5; NFS4_OTHER_SIZE] },
        recall: false,
        permissions: Nfsace { acetype: 0, flag: 0, access_mask: 0, who: "EVERYONE@".into() },
    }
}

// ============================================================================
// Client id negotiation
// ============================================================================

#[tokio::test]
async fn test_identity_negotiation() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.negotiate_identity("client-1", VERIFIER).await }
    });

    let call = peer.read_call().await?;
    let mut dec = compound_ops(&call, &[Opcode::SETCLIENTID])?;
    assert_eq!(dec.u32()?, Opcode::SETCLIENTID.0);
    assert_eq!(dec.opaque_fixed(8)?, &VERIFIER);
    assert_eq!(dec.opaque()?, b"client-1");
    assert_eq!(dec.u32()?, DEFAULT_CB_PROGRAM);
    assert_eq!(dec.string()?, "tcp");
    assert_eq!(dec.string()?, "0.0.0.0.0.0");
    assert_eq!(dec.u32()?, 1, "first callback ident");
    dec.done()?;
    let body = ResBody::Setclientid { clientid: CLIENTID, confirm: CONFIRM };
    reply(&mut peer, call.header.xid, Status::OK, vec![OpResult::new(Opcode::SETCLIENTID, Status::OK, body)]).await?;

    let call = peer.read_call().await?;
    let mut dec = compound_ops(&call, &[Opcode::SETCLIENTID_CONFIRM])?;
    assert_eq!(dec.u32()?, Opcode::SETCLIENTID_CONFIRM.0);
    assert_eq!(dec.u64()?, CLIENTID);
    assert_eq!(dec.opaque_fixed(8)?, &CONFIRM);
    reply(&mut peer, call.header.xid, Status::OK, vec![ok(Opcode::SETCLIENTID_CONFIRM)]).await?;

    assert_eq!(task.await??, CLIENTID);
    let identity = client.session().identity();
    assert!(identity.confirmed);
    assert_eq!(identity.id, "client-1");
    assert_eq!(identity.verifier, VERIFIER);
    assert_eq!(identity.clientid, Some(CLIENTID));
    assert_eq!(identity.confirm, Some(CONFIRM));
    assert_eq!(client.session().clientid()?, CLIENTID);
    Ok(())
}

async fn answer_setclientid(peer: &mut Peer) -> anyhow::Result<()> {
    let call = peer.read_call().await?;
    let body = ResBody::Setclientid { clientid: CLIENTID, confirm: CONFIRM };
    reply(peer, call.header.xid, Status::OK, vec![OpResult::new(Opcode::SETCLIENTID, Status::OK, body)]).await
}

async fn answer_confirm(peer: &mut Peer, status: Status) -> anyhow::Result<()> {
    let call = peer.read_call().await?;
    compound_ops(&call, &[Opcode::SETCLIENTID_CONFIRM])?;
    let result = OpResult::status_only(Opcode::SETCLIENTID_CONFIRM, status);
    reply(peer, call.header.xid, status, vec![result]).await
}

#[tokio::test]
async fn test_init_forgets_previous_clientid() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    confirm(&client);
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.init().await }
    });

    let call = peer.read_call().await?;
    let mut dec = compound_ops(&call, &[Opcode::SETCLIENTID])?;
    dec.u32()?;
    dec.opaque_fixed(8)?;
    assert_eq!(dec.opaque()?, client.config().client_id.as_bytes());
    assert!(!client.session().is_confirmed());
    assert_eq!(client.session().identity().clientid, None);

    let failed = OpResult::status_only(Opcode::SETCLIENTID, Status::SERVERFAULT);
    reply(&mut peer, call.header.xid, Status::SERVERFAULT, vec![failed]).await?;
    assert!(task.await?.is_err());
    Ok(())
}

#[tokio::test]
async fn test_confirm_retried_once() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.negotiate_identity("client-1", VERIFIER).await }
    });
    answer_setclientid(&mut peer).await?;
    answer_confirm(&mut peer, Status::RESOURCE).await?;
    answer_confirm(&mut peer, Status::OK).await?;
    assert_eq!(task.await??, CLIENTID);
    assert!(client.session().is_confirmed());
    Ok(())
}

#[tokio::test]
async fn test_confirm_gives_up_after_retry() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.negotiate_identity("client-1", VERIFIER).await }
    });
    answer_setclientid(&mut peer).await?;
    answer_confirm(&mut peer, Status::DELAY).await?;
    answer_confirm(&mut peer, Status::DELAY).await?;

    match task.await?.unwrap_err() {
        Error::Status(bad) => {
            assert_eq!(bad.status, Status::DELAY);
            assert_eq!(bad.opcode, Some(Opcode::SETCLIENTID_CONFIRM));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!client.session().is_confirmed());
    Ok(())
}

#[tokio::test]
async fn test_clid_inuse() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.negotiate_identity("client-1", VERIFIER).await }
    });
    let call = peer.read_call().await?;
    let body = ResBody::ClientInUse(ClientAddr { netid: "tcp".into(), addr: "10.0.0.1.8.1".into() });
    let result = OpResult::new(Opcode::SETCLIENTID, Status::CLID_INUSE, body);
    reply(&mut peer, call.header.xid, Status::CLID_INUSE, vec![result]).await?;

    assert!(matches!(task.await?, Err(Error::Status(bad)) if bad.status == Status::CLID_INUSE));
    Ok(())
}

// ============================================================================
// Compound validation over the wire
// ============================================================================

#[tokio::test]
async fn test_short_reply_is_invalid() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move {
            let ops = vec![ArgOp::Putrootfh, ArgOp::Lookup { objname: "a".into() }, ArgOp::Getfh];
            client.compound(ops, "short").await
        }
    });

    let call = peer.read_call().await?;
    compound_ops(&call, &[Opcode::PUTROOTFH, Opcode::LOOKUP, Opcode::GETFH])?;
    reply(&mut peer, call.header.xid, Status::OK, vec![ok(Opcode::PUTROOTFH), ok(Opcode::LOOKUP)]).await?;

    match task.await?.unwrap_err() {
        Error::InvalidCompound(invalid) => {
            assert_eq!(invalid.status, Status::OK);
            assert!(invalid.reason.contains("2 results for 3 operations"), "{}", invalid.reason);
        }
        other => panic!("unexpected error {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_failing_status_is_data() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.get_fh(&["missing"]).await }
    });
    let call = peer.read_call().await?;
    let failed = OpResult::status_only(Opcode::LOOKUP, Status::NOENT);
    reply(&mut peer, call.header.xid, Status::NOENT, vec![ok(Opcode::PUTROOTFH), failed]).await?;

    match task.await?.unwrap_err() {
        Error::Status(bad) => {
            assert_eq!(bad.opcode, Some(Opcode::LOOKUP));
            assert_eq!(bad.status, Status::NOENT);
        }
        other => panic!("unexpected error {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_out_of_order_compounds() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    let first = tokio::spawn({
        let client = client.clone();
        async move { client.compound(vec![ArgOp::Putrootfh], "first").await }
    });
    let a = peer.read_call().await?;
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.compound(vec![ArgOp::Savefh], "second").await }
    });
    let b = peer.read_call().await?;

    reply(&mut peer, b.header.xid, Status::OK, vec![ok(Opcode::SAVEFH)]).await?;
    assert_eq!(second.await??.results, vec![ok(Opcode::SAVEFH)]);
    reply(&mut peer, a.header.xid, Status::OK, vec![ok(Opcode::PUTROOTFH)]).await?;
    assert_eq!(first.await??.results, vec![ok(Opcode::PUTROOTFH)]);
    Ok(())
}

#[tokio::test]
async fn test_trailing_reply_bytes_rejected() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.compound(vec![ArgOp::Putrootfh], "trailing").await }
    });
    let call = peer.read_call().await?;
    let res = CompoundRes { status: Status::OK, tag: String::new(), results: vec![ok(Opcode::PUTROOTFH)] };
    let mut body = xdrpack::to_bytes(&res)?;
    body.extend_from_slice(&[0, 0, 0, 0]);
    peer.reply(call.header.xid, &body).await?;

    assert_eq!(task.await?.unwrap_err(), Error::Codec(xdrpack::Error::TrailingBytes(4)));
    Ok(())
}

#[tokio::test]
async fn test_empty_compound() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.compound(vec![], "").await }
    });

    let call = peer.read_call().await?;
    assert_eq!(call.header.procedure, NFSPROC4_COMPOUND);
    // Empty tag, minor version 0, no operations.
    assert_eq!(call.args, vec![0; 12]);
    reply(&mut peer, call.header.xid, Status::OK, vec![]).await?;

    let res = task.await??;
    assert_eq!(res.status, Status::OK);
    assert!(res.results.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_raw_setattr_failure_is_data() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    let task = tokio::spawn({
        let client = client.clone();
        async move {
            // stateid, then an empty fattr4
            let ops = vec![ArgOp::Putfh { object: vec![1] }, ArgOp::Raw { opcode: Opcode::SETATTR, body: vec![0; 24] }];
            client.compound(ops, "setattr").await
        }
    });

    let call = peer.read_call().await?;
    compound_ops(&call, &[Opcode::PUTFH, Opcode::SETATTR])?;
    let failed = OpResult::new(Opcode::SETATTR, Status::BAD_STATEID, ResBody::Setattr(vec![]));
    reply(&mut peer, call.header.xid, Status::BAD_STATEID, vec![ok(Opcode::PUTFH), failed.clone()]).await?;

    let res = task.await??;
    assert_eq!(res.status, Status::BAD_STATEID);
    assert_eq!(res.last(), Some(&failed));
    Ok(())
}

// ============================================================================
// Seqids
// ============================================================================

#[tokio::test]
async fn test_stateful_ops_need_confirmation() -> anyhow::Result<()> {
    let (client, _peer) = setup().await?;
    assert_eq!(client.open_file("owner", &["f"]).await.unwrap_err(), Error::NotConfirmed);
    let range = LockRange::to_end(LockType::Write, 0);
    assert_eq!(
        client.lock_file("owner", &[1], Stateid::ANONYMOUS, range, None).await.unwrap_err(),
        Error::NotConfirmed
    );
    assert_eq!(client.close_file("owner", &[1], Stateid::ANONYMOUS).await.unwrap_err(), Error::NotConfirmed);
    Ok(())
}

#[tokio::test]
async fn test_open_confirm_uses_next_seqid() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    confirm(&client);
    let stateid = Stateid { seqid: 1, other: [3; NFS4_OTHER_SIZE] };

    let task = tokio::spawn({
        let client = client.clone();
        async move { client.open_confirm("owner", &["dir", "file"]).await }
    });

    let call = peer.read_call().await?;
    let mut dec = compound_ops(&call, &[Opcode::PUTROOTFH, Opcode::LOOKUP, Opcode::OPEN, Opcode::GETFH])?;
    assert_eq!(dec.u32()?, Opcode::PUTROOTFH.0);
    assert_eq!(dec.u32()?, Opcode::LOOKUP.0);
    assert_eq!(dec.string()?, "dir");
    assert_eq!(dec.u32()?, Opcode::OPEN.0);
    assert_eq!(dec.u32()?, 0, "open seqid");
    assert_eq!(dec.u32()?, OPEN4_SHARE_ACCESS_READ);
    assert_eq!(dec.u32()?, OPEN4_SHARE_DENY_NONE);
    assert_eq!(dec.u64()?, CLIENTID);
    assert_eq!(dec.opaque()?, b"owner");
    assert_eq!(dec.u32()?, OPEN4_NOCREATE);
    assert_eq!(dec.u32()?, CLAIM_NULL);
    assert_eq!(dec.string()?, "file");
    reply(
        &mut peer,
        call.header.xid,
        Status::OK,
        vec![
            ok(Opcode::PUTROOTFH),
            ok(Opcode::LOOKUP),
            open_ok(stateid, OPEN4_RESULT_CONFIRM, OpenDelegation::None),
            OpResult::new(Opcode::GETFH, Status::OK, ResBody::Getfh(vec![0xfe])),
        ],
    )
    .await?;

    let call = peer.read_call().await?;
    let mut dec = compound_ops(&call, &[Opcode::PUTFH, Opcode::OPEN_CONFIRM])?;
    assert_eq!(dec.u32()?, Opcode::PUTFH.0);
    assert_eq!(dec.opaque()?, &[0xfe]);
    assert_eq!(dec.u32()?, Opcode::OPEN_CONFIRM.0);
    assert_eq!(dec.u32()?, stateid.seqid);
    assert_eq!(dec.opaque_fixed(NFS4_OTHER_SIZE)?, &stateid.other);
    assert_eq!(dec.u32()?, 1, "confirm seqid");
    let confirmed = Stateid { seqid: 2, ..stateid };
    reply(
        &mut peer,
        call.header.xid,
        Status::OK,
        vec![ok(Opcode::PUTFH), OpResult::new(Opcode::OPEN_CONFIRM, Status::OK, ResBody::Stateid(confirmed))],
    )
    .await?;

    let opened = task.await??;
    assert_eq!(opened.fh, vec![0xfe]);
    assert_eq!(opened.stateid, confirmed);
    assert_eq!(client.session().next_sequence(&OwnerKey::open("owner")), 2);
    Ok(())
}

#[tokio::test]
async fn test_seqid_advances_on_invalid_reply_only() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    confirm(&client);
    let owner = OwnerKey::open("owner");

    // Server status obtained, reply malformed: advance.
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.close_file("owner", &[1], Stateid::ANONYMOUS).await }
    });
    let call = peer.read_call().await?;
    reply(&mut peer, call.header.xid, Status::OK, vec![ok(Opcode::PUTFH)]).await?;
    assert!(matches!(task.await?, Err(Error::InvalidCompound(_))));
    assert_eq!(client.session().next_sequence(&owner), 1);

    // Non-advancing status: hold.
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.close_file("owner", &[1], Stateid::ANONYMOUS).await }
    });
    let call = peer.read_call().await?;
    let failed = OpResult::status_only(Opcode::CLOSE, Status::BAD_SEQID);
    reply(&mut peer, call.header.xid, Status::BAD_SEQID, vec![ok(Opcode::PUTFH), failed]).await?;
    assert_eq!(task.await??.status, Status::BAD_SEQID);
    assert_eq!(client.session().next_sequence(&owner), 1);

    // No status at all: hold.
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.close_file("owner", &[1], Stateid::ANONYMOUS).await }
    });
    let call = peer.read_call().await?;
    let denied = ReplyHeader::denied(call.header.xid, RejectReason::RpcMismatch { low: 2, high: 2 });
    peer.reply_with(&denied, &[]).await?;
    assert!(matches!(task.await?, Err(Error::Rpc(oncrpc::Error::Denied(_)))));
    assert_eq!(client.session().next_sequence(&owner), 1);
    Ok(())
}

#[tokio::test]
async fn test_lock_advances_open_and_lock_owners() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    confirm(&client);
    let open_stateid = Stateid { seqid: 1, other: [1; NFS4_OTHER_SIZE] };
    let lock_stateid = Stateid { seqid: 1, other: [2; NFS4_OTHER_SIZE] };
    let range = LockRange::new(LockType::Write, 10, 20);

    let task = tokio::spawn({
        let client = client.clone();
        async move { client.lock_file("owner", &[1], open_stateid, range, Some("locker")).await }
    });
    let call = peer.read_call().await?;
    let mut dec = compound_ops(&call, &[Opcode::PUTFH, Opcode::LOCK])?;
    assert_eq!(dec.u32()?, Opcode::PUTFH.0);
    dec.opaque()?;
    assert_eq!(dec.u32()?, Opcode::LOCK.0);
    assert_eq!(dec.u32()?, LockType::Write as u32);
    assert!(!dec.bool()?);
    assert_eq!((dec.u64()?, dec.u64()?), (10, 20));
    assert!(dec.bool()?, "new lock owner");
    assert_eq!(dec.u32()?, 0, "open seqid");
    dec.opaque_fixed(4 + NFS4_OTHER_SIZE)?;
    assert_eq!(dec.u32()?, 0, "lock seqid");
    assert_eq!(dec.u64()?, CLIENTID);
    assert_eq!(dec.opaque()?, b"locker");
    reply(
        &mut peer,
        call.header.xid,
        Status::OK,
        vec![ok(Opcode::PUTFH), OpResult::new(Opcode::LOCK, Status::OK, ResBody::Stateid(lock_stateid))],
    )
    .await?;
    assert_eq!(task.await??.last().and_then(OpResult::stateid), Some(lock_stateid));
    assert_eq!(client.session().next_sequence(&OwnerKey::open("owner")), 1);
    assert_eq!(client.session().next_sequence(&OwnerKey::lock("locker")), 1);

    // Unlock touches only the lock owner.
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.unlock_file("locker", &[1], lock_stateid, range).await }
    });
    let call = peer.read_call().await?;
    let mut dec = compound_ops(&call, &[Opcode::PUTFH, Opcode::LOCKU])?;
    dec.u32()?;
    dec.opaque()?;
    assert_eq!(dec.u32()?, Opcode::LOCKU.0);
    assert_eq!(dec.u32()?, LockType::Write as u32);
    assert_eq!(dec.u32()?, 1, "lock seqid");
    reply(
        &mut peer,
        call.header.xid,
        Status::OK,
        vec![ok(Opcode::PUTFH), OpResult::new(Opcode::LOCKU, Status::OK, ResBody::Stateid(lock_stateid))],
    )
    .await?;
    task.await??;
    assert_eq!(client.session().next_sequence(&OwnerKey::open("owner")), 1);
    assert_eq!(client.session().next_sequence(&OwnerKey::lock("locker")), 2);
    Ok(())
}

// ============================================================================
// Recall registration
// ============================================================================

#[tokio::test]
async fn test_recall_kept_only_with_delegation() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    confirm(&client);
    let stateid = Stateid { seqid: 1, other: [4; NFS4_OTHER_SIZE] };
    let ident = client.session().current_callback_ident();

    let task = tokio::spawn({
        let client = client.clone();
        async move {
            let options = OpenOptions::new().recall(|_| Status::OK);
            client.open_with("owner", &["file"], options).await
        }
    });
    let call = peer.read_call().await?;
    assert!(client.registry().is_registered(ident), "armed before the reply");
    reply(
        &mut peer,
        call.header.xid,
        Status::OK,
        vec![
            ok(Opcode::PUTROOTFH),
            open_ok(stateid, 0, read_delegation()),
            OpResult::new(Opcode::GETFH, Status::OK, ResBody::Getfh(vec![1])),
        ],
    )
    .await?;
    task.await??;
    assert!(client.registry().is_registered(ident));

    let called = Arc::new(AtomicBool::new(false));
    let task = tokio::spawn({
        let client = client.clone();
        let called = called.clone();
        async move {
            let options = OpenOptions::new().recall(move |_| {
                called.store(true, Ordering::SeqCst);
                Status::OK
            });
            client.open_with("owner", &["file"], options).await
        }
    });
    let call = peer.read_call().await?;
    reply(
        &mut peer,
        call.header.xid,
        Status::OK,
        vec![
            ok(Opcode::PUTROOTFH),
            open_ok(stateid, 0, OpenDelegation::None),
            OpResult::new(Opcode::GETFH, Status::OK, ResBody::Getfh(vec![1])),
        ],
    )
    .await?;
    task.await??;
    assert!(!client.registry().is_registered(ident));
    assert!(!called.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn test_create_file_sends_guarded_mode() -> anyhow::Result<()> {
    let (client, mut peer) = setup().await?;
    confirm(&client);
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.create_file("owner", &["new"]).await }
    });
    let call = peer.read_call().await?;
    let mut dec = compound_ops(&call, &[Opcode::PUTROOTFH, Opcode::OPEN, Opcode::GETFH])?;
    assert_eq!(dec.u32()?, Opcode::PUTROOTFH.0);
    assert_eq!(dec.u32()?, Opcode::OPEN.0);
    dec.u32()?;
    assert_eq!(dec.u32()?, OPEN4_SHARE_ACCESS_BOTH);
    assert_eq!(dec.u32()?, OPEN4_SHARE_DENY_WRITE);
    dec.u64()?;
    dec.opaque()?;
    assert_eq!(dec.u32()?, OPEN4_CREATE);
    assert_eq!(dec.u32()?, GUARDED4);
    let attrs: Fattr = dec.unpack()?;
    assert_eq!(attrs.values()?.get(&attr::FATTR4_MODE), Some(&attr::AttrValue::U32(0o644)));

    let failed = OpResult::status_only(Opcode::OPEN, Status::EXIST);
    reply(&mut peer, call.header.xid, Status::EXIST, vec![ok(Opcode::PUTROOTFH), failed]).await?;
    assert_eq!(task.await??.status, Status::EXIST);
    assert_eq!(client.session().next_sequence(&OwnerKey::open("owner")), 1);
    Ok(())
}

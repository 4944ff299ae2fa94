//! The callback listener over TCP loopback, called the way a server would.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use nfs4::CallbackConfig;
use nfs4::CallbackListener;
use nfs4::ClientConfig;
use nfs4::Nfs4Client;
use nfs4::Recall;
use nfs4::RecallRegistry;
use nfs4::proto::attr::AttrValue;
use nfs4::proto::attr::FATTR4_SIZE;
use nfs4::proto::attr::list_to_mask;
use nfs4::proto::consts::*;
use nfs4::proto::*;
use oncrpc::AuthNone;
use oncrpc::RpcClient;
use oncrpc::message::AcceptError;
use oncrpc::mock_stream::DuplexConnector;
use oncrpc::server::ServerState;
use xdrpack::Decoder;

async fn start() -> anyhow::Result<CallbackListener> {
    let config = CallbackConfig::new().bind("127.0.0.1:0");
    Ok(CallbackListener::start(&config, Arc::new(RecallRegistry::new())).await?)
}

async fn server_side(listener: &CallbackListener) -> anyhow::Result<RpcClient> {
    let config = oncrpc::ClientConfig::new(listener.program(), CB_VERSION).timeout(Duration::from_secs(5));
    Ok(RpcClient::connect(listener.local_addr().to_string(), config, Arc::new(AuthNone)).await?)
}

async fn cb_compound(rpc: &RpcClient, args: &CbCompoundArgs) -> anyhow::Result<CbCompoundRes> {
    let reply = rpc.call(CB_COMPOUND, &xdrpack::to_bytes(args)?).await?;
    Ok(xdrpack::from_bytes(&reply)?)
}

fn recall(ident: u32) -> CbCompoundArgs {
    CbCompoundArgs {
        tag: "recall".into(),
        minor_version: 0,
        callback_ident: ident,
        ops: vec![CbArgOp::Recall {
            stateid: Stateid { seqid: 1, other: [8; NFS4_OTHER_SIZE] },
            truncate: false,
            fh: vec![0xab],
        }],
    }
}

#[tokio::test]
async fn test_delegation_recall() -> anyhow::Result<()> {
    let listener = start().await?;
    assert_eq!(listener.state(), ServerState::Serving);
    let seen: Arc<Mutex<Option<Recall>>> = Arc::new(Mutex::new(None));
    listener.registry().register(42, {
        let seen = seen.clone();
        move |recall: &Recall| {
            *seen.lock().unwrap() = Some(recall.clone());
            Status::OK
        }
    });

    let rpc = server_side(&listener).await?;
    rpc.null().await?;
    let res = cb_compound(&rpc, &recall(42)).await?;
    assert_eq!(res.status, Status::OK);
    assert_eq!(res.tag, "recall");
    assert_eq!(res.results, vec![CbResult::status_only(Opcode::CB_RECALL, Status::OK)]);

    let recall = seen.lock().unwrap().clone().expect("handler ran");
    assert_eq!(recall.callback_ident, 42);
    assert_eq!(recall.fh, vec![0xab]);
    assert_eq!(listener.registry().last_result(42), Some(Status::OK));
    assert_eq!(listener.registry().stats().recalls, 1);

    listener.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_getattr_and_garbage() -> anyhow::Result<()> {
    let listener = start().await?;
    let mut values = BTreeMap::new();
    values.insert(FATTR4_SIZE, AttrValue::U64(512));
    listener.registry().set_cached_attrs(7, Fattr::from_values(&values)?);

    let rpc = server_side(&listener).await?;
    let args = CbCompoundArgs {
        tag: String::new(),
        minor_version: 0,
        callback_ident: 7,
        ops: vec![CbArgOp::Getattr { fh: vec![1], attr_request: list_to_mask(&[FATTR4_SIZE]) }],
    };
    let res = cb_compound(&rpc, &args).await?;
    assert_eq!(res.status, Status::OK);
    assert_eq!(res.results[0].body, CbResBody::Getattr(Fattr::from_values(&values)?));

    // Truncated arguments: BADXDR, no results.
    let reply = rpc.call(CB_COMPOUND, &[0, 0, 0, 9]).await?;
    let mut dec = Decoder::new(&reply);
    assert_eq!(Status(dec.u32()?), Status::BADXDR);
    assert_eq!(dec.string()?, "");
    assert_eq!(dec.u32()?, 0);
    dec.done()?;

    assert_eq!(rpc.call(5, &[]).await.unwrap_err(), oncrpc::Error::Accepted(AcceptError::ProcUnavail));
    listener.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_suspended_listener_holds_recalls() -> anyhow::Result<()> {
    let listener = start().await?;
    listener.registry().register(3, |_| Status::OK);
    let rpc = Arc::new(server_side(&listener).await?);
    rpc.null().await?;

    listener.suspend().await?;
    assert_eq!(listener.state(), ServerState::Suspended);
    let pending = tokio::spawn({
        let rpc = rpc.clone();
        async move { cb_compound(&rpc, &recall(3)).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished());
    assert_eq!(listener.registry().last_result(3), None);

    listener.resume().await?;
    assert_eq!(pending.await??.status, Status::OK);
    assert_eq!(listener.registry().last_result(3), Some(Status::OK));
    listener.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_client_advertises_listener() -> anyhow::Result<()> {
    let (connector, mut acceptor) = DuplexConnector::pair();
    let config = ClientConfig::new("stub")
        .callback(Some(CallbackConfig::new().bind("127.0.0.1:0")))
        .timeout(Duration::from_secs(5));
    let client = Arc::new(Nfs4Client::with_connector(config, Arc::new(connector)).await?);
    let mut peer = acceptor.accept().await.expect("dialed");
    let port = client.listener().expect("listener").local_addr().port();

    let task = tokio::spawn({
        let client = client.clone();
        async move { client.negotiate_identity("client-1", *b"12345678").await }
    });
    let call = peer.read_call().await?;
    let mut dec = Decoder::new(&call.args);
    dec.string()?;
    dec.u32()?;
    dec.u32()?;
    assert_eq!(Opcode(dec.u32()?), Opcode::SETCLIENTID);
    dec.opaque_fixed(NFS4_VERIFIER_SIZE)?;
    dec.opaque()?;
    assert_eq!(dec.u32()?, DEFAULT_CB_PROGRAM);
    assert_eq!(dec.string()?, "tcp");
    assert_eq!(dec.string()?, format!("127.0.0.1.{}.{}", port >> 8, port & 0xff));

    let failed = OpResult::status_only(Opcode::SETCLIENTID, Status::SERVERFAULT);
    let res = CompoundRes { status: Status::SERVERFAULT, tag: String::new(), results: vec![failed] };
    peer.reply(call.header.xid, &xdrpack::to_bytes(&res)?).await?;
    assert!(task.await?.is_err());

    let client = Arc::into_inner(client).expect("sole owner");
    client.shutdown().await?;
    Ok(())
}

//! Client and multiplexer behavior against a scripted peer over duplex pipes.

use std::sync::Arc;
use std::time::Duration;

use oncrpc::AuthNone;
use oncrpc::ClientConfig;
use oncrpc::Error;
use oncrpc::RpcClient;
use oncrpc::TransportError;
use oncrpc::message::AcceptError;
use oncrpc::message::AuthStat;
use oncrpc::message::OpaqueAuth;
use oncrpc::message::RejectReason;
use oncrpc::message::ReplyHeader;
use oncrpc::mock_stream::DuplexAcceptor;
use oncrpc::mock_stream::DuplexConnector;

const PROGRAM: u32 = 0x2000_0100;

async fn setup(config: ClientConfig) -> (Arc<RpcClient>, Arc<DuplexConnector>, DuplexAcceptor) {
    let (connector, acceptor) = DuplexConnector::pair();
    let connector = Arc::new(connector);
    let client = RpcClient::with_connector(connector.clone(), config, Arc::new(AuthNone))
        .await
        .expect("connect");
    (Arc::new(client), connector, acceptor)
}

fn config() -> ClientConfig {
    ClientConfig::new(PROGRAM, 1).timeout(Duration::from_secs(5))
}

// --- Correlation ---

#[tokio::test]
async fn test_xids_start_at_one() -> anyhow::Result<()> {
    let (client, _, mut acceptor) = setup(config()).await;
    let mut peer = acceptor.accept().await.expect("dialed");

    let first = client.send(1, b"a").await?;
    let second = client.send(1, b"b").await?;
    assert_eq!((first, second), (1, 2));

    let call = peer.read_call().await?;
    assert_eq!(call.header.xid, 1);
    assert_eq!(call.header.program, PROGRAM);
    assert_eq!(call.header.version, 1);
    assert_eq!(call.header.procedure, 1);
    assert_eq!(call.args, b"a");
    Ok(())
}

#[tokio::test]
async fn test_out_of_order_replies() -> anyhow::Result<()> {
    let (client, _, mut acceptor) = setup(config()).await;
    let mut peer = acceptor.accept().await.expect("dialed");

    let five = client.send(1, b"five").await?;
    let six = client.send(1, b"six").await?;

    peer.read_call().await?;
    peer.read_call().await?;
    peer.reply(six, b"reply-six").await?;
    peer.reply(five, b"reply-five").await?;

    // The first listener reads six's reply, parks it and keeps reading.
    assert_eq!(client.listen(five).await?, b"reply-five");
    assert_eq!(client.listen(six).await?, b"reply-six");
    assert_eq!(client.multiplexer().outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_callers() -> anyhow::Result<()> {
    let (client, _, mut acceptor) = setup(config()).await;
    let mut peer = acceptor.accept().await.expect("dialed");

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move { client.call(1, &[i]).await }));
    }

    let mut calls = Vec::new();
    for _ in 0..8 {
        calls.push(peer.read_call().await?);
    }
    for call in calls.iter().rev() {
        peer.reply(call.header.xid, &call.args).await?;
    }

    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await??, vec![i as u8]);
    }
    Ok(())
}

#[tokio::test]
async fn test_reply_for_unknown_xid() -> anyhow::Result<()> {
    let (client, _, mut acceptor) = setup(config()).await;
    let mut peer = acceptor.accept().await.expect("dialed");

    let xid = client.send(1, b"x").await?;
    peer.read_call().await?;
    peer.reply(99, b"stray").await?;

    let err = client.listen(xid).await.unwrap_err();
    assert_eq!(err, Error::UnexpectedReply { received: 99, expected: xid });
    Ok(())
}

#[tokio::test]
async fn test_listen_unknown_xid() {
    let (client, _, _acceptor) = setup(config()).await;
    assert_eq!(client.listen(12345).await.unwrap_err(), Error::UnknownXid(12345));
}

// --- Reply classification ---

#[tokio::test]
async fn test_denied_and_accepted_errors() -> anyhow::Result<()> {
    let (client, _, mut acceptor) = setup(config()).await;
    let mut peer = acceptor.accept().await.expect("dialed");

    let a = client.send(1, b"").await?;
    let b = client.send(1, b"").await?;
    let c = client.send(1, b"").await?;
    for _ in 0..3 {
        peer.read_call().await?;
    }
    peer.reply_with(&ReplyHeader::denied(a, RejectReason::AuthError(AuthStat::BADCRED)), b"").await?;
    peer.reply_with(&ReplyHeader::denied(b, RejectReason::RpcMismatch { low: 2, high: 2 }), b"").await?;
    let mismatch = AcceptError::ProgMismatch { low: 2, high: 3 };
    peer.reply_with(&ReplyHeader::accepted_error(c, OpaqueAuth::none(), mismatch), b"").await?;

    assert_eq!(
        client.listen(a).await.unwrap_err(),
        Error::Denied(RejectReason::AuthError(AuthStat::BADCRED))
    );
    assert_eq!(
        client.listen(b).await.unwrap_err(),
        Error::Denied(RejectReason::RpcMismatch { low: 2, high: 2 })
    );
    assert_eq!(client.listen(c).await.unwrap_err(), Error::Accepted(mismatch));
    Ok(())
}

#[tokio::test]
async fn test_null_requires_empty_reply() -> anyhow::Result<()> {
    let (client, _, mut acceptor) = setup(config()).await;
    let mut peer = acceptor.accept().await.expect("dialed");

    let responder = tokio::spawn(async move {
        let call = peer.read_call().await?;
        assert_eq!(call.header.procedure, 0);
        assert!(call.args.is_empty());
        peer.reply(call.header.xid, b"").await?;
        let call = peer.read_call().await?;
        peer.reply(call.header.xid, &[0, 0, 0, 1]).await?;
        anyhow::Ok(())
    });

    client.null().await?;
    assert!(matches!(client.null().await, Err(Error::Protocol(_))));
    responder.await??;
    Ok(())
}

// --- Failure recovery ---

#[tokio::test]
async fn test_reconnect_resends_once() -> anyhow::Result<()> {
    let (client, connector, mut acceptor) = setup(config()).await;
    let mut first = acceptor.accept().await.expect("dialed");

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call(1, b"idempotent").await }
    });

    let original = first.read_call().await?;
    drop(first);

    let mut second = acceptor.accept().await.expect("redialed");
    let resent = second.read_call().await?;
    assert_eq!(resent.raw, original.raw);
    second.reply(resent.header.xid, b"done").await?;

    assert_eq!(call.await??, b"done");
    assert_eq!(connector.dials(), 2);
    assert_eq!(client.multiplexer().connection().epoch(), 1);
    Ok(())
}

#[tokio::test]
async fn test_second_failure_surfaces() -> anyhow::Result<()> {
    let (client, _, mut acceptor) = setup(config()).await;
    let mut first = acceptor.accept().await.expect("dialed");

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call(1, b"doomed").await }
    });

    first.read_call().await?;
    drop(first);
    let mut second = acceptor.accept().await.expect("redialed");
    second.read_call().await?;
    drop(second);

    assert!(matches!(
        call.await?,
        Err(Error::Transport(TransportError::ConnectionLost(_)))
    ));
    assert_eq!(client.multiplexer().outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn test_timeout_is_not_retried() -> anyhow::Result<()> {
    let (client, connector, mut acceptor) = setup(config().timeout(Duration::from_millis(50))).await;
    let mut peer = acceptor.accept().await.expect("dialed");

    let xid = client.send(1, b"slow").await?;
    peer.read_call().await?;

    assert_eq!(client.listen(xid).await.unwrap_err(), Error::Transport(TransportError::Timeout));
    assert_eq!(connector.dials(), 1);
    Ok(())
}

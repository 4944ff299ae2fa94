use std::sync::Arc;

use rand::Rng;
use xdrpack::Decoder;
use xdrpack::Encoder;
use xdrpack::Pack;

use crate::auth::AuthNone;
use crate::auth::AuthSys;
use crate::auth::AuthSysParams;
use crate::auth::SecurityFlavor;
use crate::message::*;
use crate::record::*;
use crate::server::CallContext;
use crate::server::Dispatch;
use crate::server::Program;
use crate::server::Service;
use crate::error::TransportError;

fn marks(framed: &[u8]) -> Vec<u32> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < framed.len() {
        let mark = u32::from_be_bytes([framed[pos], framed[pos + 1], framed[pos + 2], framed[pos + 3]]);
        out.push(mark);
        pos += 4 + (mark & !LAST_FRAGMENT) as usize;
    }
    out
}

// ============================================================================
// Record marking
// ============================================================================

#[test]
fn test_empty_record_is_single_last_fragment() {
    let framed = encode_record(&[], DEFAULT_CHUNK_SIZE);
    assert_eq!(framed, vec![0x80, 0, 0, 0]);
    let (payload, used) = decode_record(&framed, DEFAULT_MAX_RECORD_SIZE).unwrap().unwrap();
    assert!(payload.is_empty());
    assert_eq!(used, 4);
}

#[test]
fn test_exact_chunk_is_one_fragment() {
    let payload = vec![7u8; DEFAULT_CHUNK_SIZE];
    let framed = encode_record(&payload, DEFAULT_CHUNK_SIZE);
    assert_eq!(marks(&framed), vec![LAST_FRAGMENT | 2048]);
    let (decoded, _) = decode_record(&framed, DEFAULT_MAX_RECORD_SIZE).unwrap().unwrap();
    assert_eq!(decoded, payload);
}

#[test]
fn test_chunks_plus_remainder() {
    let payload: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
    let framed = encode_record(&payload, DEFAULT_CHUNK_SIZE);
    assert_eq!(marks(&framed), vec![2048, 2048, LAST_FRAGMENT | 904]);
    let (decoded, used) = decode_record(&framed, DEFAULT_MAX_RECORD_SIZE).unwrap().unwrap();
    assert_eq!(decoded, payload);
    assert_eq!(used, framed.len());
}

#[test]
fn test_random_lengths_and_chunk_sizes() {
    let mut rng = rand::thread_rng();
    for _ in 0..50 {
        let len = rng.gen_range(0..20_000);
        let chunk = rng.gen_range(1..4096);
        let mut payload = vec![0u8; len];
        rng.fill(&mut payload[..]);
        let framed = encode_record(&payload, chunk);
        let (decoded, used) = decode_record(&framed, DEFAULT_MAX_RECORD_SIZE).unwrap().unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(used, framed.len());
    }
}

#[test]
fn test_partial_record_is_incomplete() {
    let framed = encode_record(&[1, 2, 3, 4, 5], 2);
    assert_eq!(decode_record(&framed[..framed.len() - 1], 1024).unwrap(), None);
    assert_eq!(decode_record(&framed[..2], 1024).unwrap(), None);
}

#[test]
fn test_oversized_record_rejected() {
    let framed = encode_record(&[0u8; 100], 32);
    assert_eq!(
        decode_record(&framed, 64),
        Err(TransportError::RecordTooLarge { len: 96, max: 64 })
    );
}

#[tokio::test]
async fn test_async_read_record() {
    let payload = vec![42u8; 3000];
    let mut framed = encode_record(&payload, 1000);
    framed.extend_from_slice(&encode_record(b"next", 1000));
    let mut reader: &[u8] = &framed;
    assert_eq!(read_record(&mut reader, DEFAULT_MAX_RECORD_SIZE).await.unwrap(), payload);
    assert_eq!(read_record(&mut reader, DEFAULT_MAX_RECORD_SIZE).await.unwrap(), b"next");
    assert!(matches!(
        read_record(&mut reader, DEFAULT_MAX_RECORD_SIZE).await,
        Err(TransportError::ConnectionLost(_))
    ));
}

// ============================================================================
// Envelope
// ============================================================================

#[test]
fn test_reply_headers_roundtrip() -> xdrpack::Result<()> {
    let headers = [
        ReplyHeader::success(1, OpaqueAuth::none()),
        ReplyHeader::accepted_error(2, OpaqueAuth::none(), AcceptError::ProgMismatch { low: 1, high: 4 }),
        ReplyHeader::accepted_error(3, OpaqueAuth::none(), AcceptError::GarbageArgs),
        ReplyHeader::denied(4, RejectReason::RpcMismatch { low: 2, high: 2 }),
        ReplyHeader::denied(5, RejectReason::AuthError(AuthStat::TOOWEAK)),
    ];
    for header in headers {
        let bytes = xdrpack::to_bytes(&header)?;
        assert_eq!(peek_xid(&bytes)?, header.xid);
        assert_eq!(xdrpack::from_bytes::<ReplyHeader>(&bytes)?, header);
    }
    Ok(())
}

#[test]
fn test_call_header_rejects_reply() -> xdrpack::Result<()> {
    let bytes = xdrpack::to_bytes(&ReplyHeader::success(9, OpaqueAuth::none()))?;
    let mut dec = Decoder::new(&bytes);
    assert_eq!(
        dec.unpack::<CallHeader>(),
        Err(xdrpack::Error::InvalidDiscriminant { type_name: "msg_type", value: REPLY })
    );
    Ok(())
}

#[test]
fn test_oversized_auth_body() {
    let auth = OpaqueAuth::new(AUTH_SYS, vec![0; MAX_AUTH_BYTES + 1]);
    assert!(matches!(xdrpack::to_bytes(&auth), Err(xdrpack::Error::LengthTooLarge { .. })));
}

// ============================================================================
// Flavors
// ============================================================================

#[test]
fn test_auth_sys_credential() -> crate::Result<()> {
    let flavor = AuthSys::new("client.example", 1000, 100).stamp(77).gids(vec![4, 24]);
    let (cred, seq) = flavor.make_credential()?;
    assert_eq!(cred.flavor, AUTH_SYS);
    assert_eq!(seq, 0);
    let params: AuthSysParams = xdrpack::from_bytes(&cred.body)?;
    assert_eq!(params.stamp, 77);
    assert_eq!(params.machine_name, "client.example");
    assert_eq!((params.uid, params.gid), (1000, 100));
    assert_eq!(params.gids, vec![4, 24]);
    Ok(())
}

#[test]
fn test_auth_sys_too_many_gids() {
    let flavor = AuthSys::new("host", 0, 0).gids((0..17).collect());
    assert!(matches!(
        flavor.make_credential(),
        Err(crate::Error::Codec(xdrpack::Error::LengthTooLarge { len: 17, max: 16 }))
    ));
}

// ============================================================================
// Inbound service rules
// ============================================================================

struct Echo;

impl Program for Echo {
    fn program(&self) -> u32 { 0x2000_0001 }
    fn version(&self) -> u32 { 3 }

    fn dispatch(&self, call: &CallContext<'_>, args: &[u8]) -> Dispatch {
        match call.procedure {
            1 => Dispatch::Reply(args.to_vec()),
            2 => Dispatch::SystemErr,
            _ => Dispatch::ProcUnavail,
        }
    }
}

fn service() -> Service {
    Service::new(Arc::new(Echo), Arc::new(AuthNone))
}

fn call_record(rpc_version: u32, program: u32, version: u32, procedure: u32, args: &[u8]) -> Vec<u8> {
    let mut enc = Encoder::new();
    CallHeader { xid: 11, rpc_version, program, version, procedure, credential: OpaqueAuth::none() }
        .pack(&mut enc)
        .unwrap();
    OpaqueAuth::none().pack(&mut enc).unwrap();
    enc.raw(args).unwrap();
    enc.into_bytes()
}

fn reply_of(record: &[u8]) -> (ReplyHeader, Vec<u8>) {
    let reply = service().compute_reply(record, None).unwrap();
    let mut dec = Decoder::new(&reply);
    let header: ReplyHeader = dec.unpack().unwrap();
    (header, dec.rest().to_vec())
}

#[test]
fn test_service_dispatches() {
    let (header, body) = reply_of(&call_record(2, 0x2000_0001, 3, 1, &[0, 0, 0, 5]));
    assert_eq!(header, ReplyHeader::success(11, OpaqueAuth::none()));
    assert_eq!(body, vec![0, 0, 0, 5]);
}

#[test]
fn test_service_envelope_rules() {
    let cases = [
        (call_record(3, 0x2000_0001, 3, 1, &[]), ReplyBody::Denied(RejectReason::RpcMismatch { low: 2, high: 2 })),
        (call_record(2, 0x2000_0002, 3, 1, &[]), ReplyBody::Accepted { verifier: OpaqueAuth::none(), result: Err(AcceptError::ProgUnavail) }),
        (call_record(2, 0x2000_0001, 4, 1, &[]), ReplyBody::Accepted { verifier: OpaqueAuth::none(), result: Err(AcceptError::ProgMismatch { low: 3, high: 3 }) }),
        (call_record(2, 0x2000_0001, 3, 9, &[]), ReplyBody::Accepted { verifier: OpaqueAuth::none(), result: Err(AcceptError::ProcUnavail) }),
        (call_record(2, 0x2000_0001, 3, 2, &[]), ReplyBody::Accepted { verifier: OpaqueAuth::none(), result: Err(AcceptError::SystemErr) }),
        (call_record(2, 0x2000_0001, 3, 0, &[0, 0, 0, 1]), ReplyBody::Accepted { verifier: OpaqueAuth::none(), result: Err(AcceptError::GarbageArgs) }),
    ];
    for (record, expected) in cases {
        let (header, body) = reply_of(&record);
        assert_eq!(header.xid, 11);
        assert_eq!(header.body, expected);
        assert!(body.is_empty());
    }
}

#[test]
fn test_service_null() {
    let (header, body) = reply_of(&call_record(2, 0x2000_0001, 3, 0, &[]));
    assert_eq!(header, ReplyHeader::success(11, OpaqueAuth::none()));
    assert!(body.is_empty());
}

#[test]
fn test_service_rejects_truncated_header() {
    assert!(service().compute_reply(&[0, 0, 0, 1, 0, 0], None).is_err());
}

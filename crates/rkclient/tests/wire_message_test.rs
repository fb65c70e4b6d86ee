//
// wire_message_test.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! Tests for encoding, signing, and decoding Jupyter wire messages.

use hmac::{Hmac, Mac};
use rkclient::error::KernelError;
use rkclient::signature::MessageSigner;
use rkclient::wire_message::{decode, encode, to_content, SignatureCheck, WireMessage, DELIMITER};
use rkclient::wire_message_header::stamp_header;
use rkshared::connection_info::ConnectionInfo;
use rkshared::jupyter_message::{
    JupyterChannel, JupyterMessage, JupyterMessageHeader, PartialMessage,
};
use serde::{Serialize, Serializer};
use serde_json::json;
use sha2::Sha256;
use zeromq::ZmqMessage;

fn example_header() -> JupyterMessageHeader {
    JupyterMessageHeader {
        msg_id: String::from("abc"),
        session: String::from("s1"),
        username: String::from("u"),
        date: String::from("2024-01-01T00:00:00Z"),
        msg_type: String::from("execute_request"),
        version: String::from("5.3"),
    }
}

fn example_message() -> JupyterMessage {
    JupyterMessage::from_partial(PartialMessage {
        header: Some(example_header()),
        content: Some(json!({ "code": "1+1" })),
        ..Default::default()
    })
}

#[test]
fn test_execute_request_example() {
    let signer = MessageSigner::new("k", "hmac-sha256").unwrap();
    let frames = encode(&example_message(), &signer).unwrap();
    assert_eq!(frames.len(), 5);

    // The signature is the hex HMAC-SHA256 of the four JSON parts
    let mut mac = Hmac::<Sha256>::new_from_slice(b"k").unwrap();
    for part in &frames[1..5] {
        mac.update(part);
    }
    let expected = hex::encode(mac.finalize().into_bytes());
    assert_eq!(String::from_utf8(frames[0].clone()).unwrap(), expected);

    let decoded = decode(&frames, &signer).unwrap();
    assert_eq!(decoded.signature, SignatureCheck::Valid);
    assert!(decoded.is_valid());
    assert_eq!(decoded.message.header, example_header());
    assert_eq!(decoded.message.content, json!({ "code": "1+1" }));
    assert_eq!(decoded.message.parent_header, None);
    assert_eq!(decoded.message.metadata, json!({}));
    assert!(decoded.message.buffers.is_empty());
}

#[test]
fn test_round_trip_with_parent_and_buffers() {
    let parent = JupyterMessageHeader::new("kernel_info_request", "parent-1");
    let message = JupyterMessage::from_partial(
        PartialMessage::request("comm_msg", json!({ "data": { "x": [1, 2, 3] } }))
            .with_parent(parent.clone())
            .with_metadata(json!({ "tag": "test" }))
            .with_buffers(vec![vec![0, 1, 2], b"raw".to_vec()]),
    );

    for signer in [
        MessageSigner::new("secret", "hmac-sha256").unwrap(),
        MessageSigner::new("secret", "hmac-sha512").unwrap(),
        MessageSigner::Unsigned,
    ] {
        let frames = encode(&message, &signer).unwrap();
        assert_eq!(frames.len(), 7);
        let decoded = decode(&frames, &signer).unwrap().verified().unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.parent_msg_id(), Some("parent-1"));
    }
}

#[test]
fn test_default_filling_is_idempotent() {
    let partial = PartialMessage {
        content: Some(json!({ "code": "x" })),
        ..Default::default()
    };
    let filled = JupyterMessage::from_partial(partial);
    assert_eq!(filled.metadata, json!({}));
    assert_eq!(filled.parent_header, None);
    assert!(filled.buffers.is_empty());

    let refilled = JupyterMessage::from_partial(PartialMessage::from(filled.clone()));
    assert_eq!(refilled, filled);

    let signer = MessageSigner::new("k", "hmac-sha256").unwrap();
    assert_eq!(
        encode(&filled, &signer).unwrap(),
        encode(&refilled, &signer).unwrap()
    );
}

#[test]
fn test_stamping_fills_only_empty_fields() {
    let mut header = JupyterMessageHeader::new("execute_request", "");
    header.username = String::from("kept");
    stamp_header(&mut header, "session-1", "ignored");

    assert!(!header.msg_id.is_empty());
    assert_eq!(header.session, "session-1");
    assert_eq!(header.username, "kept");
    assert_eq!(header.version, "5.3");
    assert!(chrono::DateTime::parse_from_rfc3339(&header.date).is_ok());

    let stamped = header.clone();
    stamp_header(&mut header, "session-2", "other");
    assert_eq!(header, stamped);
}

#[test]
fn test_signature_is_deterministic() {
    let signer = MessageSigner::new("k", "hmac-sha256").unwrap();
    let first = encode(&example_message(), &signer).unwrap();
    let second = encode(&example_message(), &signer).unwrap();
    assert_eq!(first[0], second[0]);

    let other_key = MessageSigner::new("k2", "hmac-sha256").unwrap();
    let third = encode(&example_message(), &other_key).unwrap();
    assert_ne!(first[0], third[0]);
}

#[test]
fn test_tampering_is_detected() {
    let signer = MessageSigner::new("k", "hmac-sha256").unwrap();
    let frames = encode(&example_message(), &signer).unwrap();

    for index in 1..5 {
        for position in [0, frames[index].len() / 2, frames[index].len() - 1] {
            let mut tampered = frames.clone();
            tampered[index][position] ^= 0x01;

            let result = decode(&tampered, &signer).and_then(|d| d.verified());
            assert!(
                matches!(result, Err(KernelError::SignatureMismatch { .. })),
                "tampering with frame {} at {} went unnoticed: {:?}",
                index,
                position,
                result
            );
        }
    }

    // A forged signature is rejected too
    let mut forged = frames.clone();
    forged[0] = MessageSigner::new("not-k", "hmac-sha256")
        .unwrap()
        .sign(&[
            frames[1].as_slice(),
            frames[2].as_slice(),
            frames[3].as_slice(),
            frames[4].as_slice(),
        ])
        .into_bytes();
    let result = decode(&forged, &signer).unwrap();
    assert_eq!(result.signature, SignatureCheck::Mismatch);
    assert_eq!(
        result.verified(),
        Err(KernelError::SignatureMismatch {
            msg_id: String::from("abc")
        })
    );
}

#[test]
fn test_unsigned_mode() {
    let signer = MessageSigner::new("", "hmac-sha256").unwrap();
    assert!(!signer.is_signed());
    assert!(!MessageSigner::new("k", "").unwrap().is_signed());

    let frames = encode(&example_message(), &signer).unwrap();
    assert!(frames[0].is_empty());

    // Signatures aren't checked, whatever they contain
    let mut frames = frames;
    frames[0] = b"deadbeef".to_vec();
    let decoded = decode(&frames, &signer).unwrap();
    assert_eq!(decoded.signature, SignatureCheck::Unsigned);
    assert_eq!(decoded.verified().unwrap().header, example_header());
}

#[test]
fn test_unsupported_scheme() {
    assert_eq!(
        MessageSigner::new("k", "hmac-md5").err(),
        Some(KernelError::UnsupportedScheme(String::from("hmac-md5")))
    );
    assert!(MessageSigner::new("k", "hmac-sha384").unwrap().is_signed());
}

struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("cannot serialize this"))
    }
}

#[test]
fn test_unserializable_content() {
    let result = to_content(&Unserializable);
    assert!(matches!(result, Err(KernelError::Encoding(_))));
}

#[test]
fn test_too_few_frames() {
    let signer = MessageSigner::new("k", "hmac-sha256").unwrap();
    let frames = encode(&example_message(), &signer).unwrap();

    let result = decode(&frames[..4], &signer);
    assert!(matches!(result, Err(KernelError::Decoding { frame: 4, .. })));

    let empty: Vec<Vec<u8>> = Vec::new();
    assert!(matches!(
        decode(&empty, &signer),
        Err(KernelError::Decoding { .. })
    ));
}

#[test]
fn test_invalid_json_frame() {
    let signer = MessageSigner::Unsigned;
    let mut frames = encode(&example_message(), &signer).unwrap();
    frames[4] = b"{not json".to_vec();

    let result = decode(&frames, &signer);
    assert!(matches!(result, Err(KernelError::Decoding { frame: 4, .. })));
}

#[test]
fn test_identities_and_delimiter() {
    let signer = MessageSigner::new("k", "hmac-sha256").unwrap();
    let wire = WireMessage::from_jupyter(&example_message(), &signer)
        .unwrap()
        .with_identities(vec![b"client-1".to_vec()]);

    let zmq_message: ZmqMessage = wire.clone().into();
    let frames: Vec<Vec<u8>> = zmq_message.into_vec().into_iter().map(|f| f.to_vec()).collect();
    assert_eq!(frames.len(), 7);
    assert_eq!(frames[0], b"client-1");
    assert_eq!(frames[1], DELIMITER);

    // Receiving the raw frames splits off the identities at the delimiter
    let received = WireMessage::from_zmq(ZmqMessage::try_from(
        frames.into_iter().map(bytes::Bytes::from).collect::<Vec<_>>(),
    )
    .unwrap());
    assert_eq!(received.identities, wire.identities);
    assert_eq!(received.parts, wire.parts);

    let decoded = received.decode(&signer).unwrap();
    assert_eq!(decoded.identities, vec![b"client-1".to_vec()]);
    assert_eq!(decoded.message.header, example_header());
}

#[test]
fn test_buffer_holding_delimiter_bytes() {
    let signer = MessageSigner::new("k", "hmac-sha256").unwrap();
    let message = JupyterMessage::from_partial(PartialMessage {
        header: Some(example_header()),
        content: Some(json!({ "code": "1+1" })),
        buffers: Some(vec![DELIMITER.to_vec(), b"after".to_vec()]),
        ..Default::default()
    });

    // Buffers are opaque; a frame equal to the delimiter is still a buffer
    let frames = encode(&message, &signer).unwrap();
    let decoded = decode(&frames, &signer).unwrap().verified().unwrap();
    assert_eq!(decoded, message);

    // The same holds once the message has crossed a socket with routing
    // identities in front of it
    let wire = WireMessage::from_jupyter(&message, &signer)
        .unwrap()
        .with_identities(vec![b"client-1".to_vec()]);
    let received = WireMessage::from_zmq(wire.into());
    assert_eq!(received.identities, vec![b"client-1".to_vec()]);
    let decoded = received.decode(&signer).unwrap().verified().unwrap();
    assert_eq!(decoded, message);
}

#[test]
fn test_endpoints() {
    let mut info: ConnectionInfo = serde_json::from_value(json!({
        "shell_port": 32,
        "iopub_port": 33,
        "stdin_port": 34,
        "control_port": 35,
        "hb_port": 36,
        "ip": "127.0.0.1",
        "transport": "tcp",
        "key": "k",
        "signature_scheme": "hmac-sha256"
    }))
    .unwrap();
    assert_eq!(info.endpoint(JupyterChannel::Shell), "tcp://127.0.0.1:32");
    assert_eq!(info.endpoint(JupyterChannel::Heartbeat), "tcp://127.0.0.1:36");
    assert!(info.is_signed());

    info.transport = String::from("ipc");
    info.ip = String::from("/tmp/kernel");
    assert_eq!(info.endpoint(JupyterChannel::IOPub), "ipc:///tmp/kernel-33");
}

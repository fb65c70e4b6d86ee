//
// wire_message.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use bytes::Bytes;
use rkshared::jupyter_message::{JupyterMessage, JupyterMessageHeader};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use zeromq::ZmqMessage;

use crate::error::KernelError;
use crate::signature::MessageSigner;

/// The frame separating routing identities from the signed message parts.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// The number of protocol frames that precede the buffers: the signature and
/// the four JSON parts.
const PROTOCOL_FRAMES: usize = 5;

/// The outcome of checking a received signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// The connection is unsigned; nothing was checked
    Unsigned,
    /// The signature matched the message contents
    Valid,
    /// The signature did not match the message contents
    Mismatch,
}

/// A message decoded from the wire, along with its routing identities and the
/// result of the signature check.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub identities: Vec<Vec<u8>>,
    pub message: JupyterMessage,
    pub signature: SignatureCheck,
}

impl DecodedMessage {
    pub fn is_valid(&self) -> bool {
        self.signature != SignatureCheck::Mismatch
    }

    /// Return the message if its signature checks out.
    pub fn verified(self) -> Result<JupyterMessage, KernelError> {
        match self.signature {
            SignatureCheck::Mismatch => Err(KernelError::SignatureMismatch {
                msg_id: self.message.header.msg_id,
            }),
            _ => Ok(self.message),
        }
    }
}

/// A Jupyter message in wire form.
#[derive(Debug, Clone, Default)]
pub struct WireMessage {
    /// Routing identities preceding the delimiter
    pub identities: Vec<Vec<u8>>,

    /// The signature, the four JSON parts, and any buffers, as byte arrays
    pub parts: Vec<Vec<u8>>,
}

impl WireMessage {
    /// Create a new wire message from a Jupyter message.
    pub fn from_jupyter(msg: &JupyterMessage, signer: &MessageSigner) -> Result<Self, KernelError> {
        Ok(WireMessage {
            identities: Vec::new(),
            parts: encode(msg, signer)?,
        })
    }

    /// Address the message to the given routing identities.
    pub fn with_identities(mut self, identities: Vec<Vec<u8>>) -> Self {
        self.identities = identities;
        self
    }

    /// Split the frames of a received ZeroMQ message into identities and
    /// protocol parts.
    pub fn from_zmq(msg: ZmqMessage) -> Self {
        let mut frames: Vec<Vec<u8>> = msg.into_vec().into_iter().map(|f| f.to_vec()).collect();
        match frames.iter().position(|frame| frame.as_slice() == DELIMITER) {
            Some(pos) => {
                let parts = frames.split_off(pos + 1);
                frames.truncate(pos);
                WireMessage {
                    identities: frames,
                    parts,
                }
            }
            None => WireMessage {
                identities: Vec::new(),
                parts: frames,
            },
        }
    }

    /// Decode the parts into a Jupyter message, checking the signature.
    pub fn decode(&self, signer: &MessageSigner) -> Result<DecodedMessage, KernelError> {
        let mut decoded = decode(&self.parts, signer)?;
        decoded.identities = self.identities.clone();
        Ok(decoded)
    }
}

impl From<WireMessage> for ZmqMessage {
    fn from(msg: WireMessage) -> Self {
        let mut message = ZmqMessage::from(DELIMITER.to_vec());
        for identity in msg.identities.into_iter().rev() {
            message.push_front(Bytes::from(identity));
        }
        for part in msg.parts {
            message.push_back(Bytes::from(part));
        }
        message
    }
}

/// Serialize content into the open JSON representation used on the wire.
pub fn to_content<T: Serialize>(content: &T) -> Result<Value, KernelError> {
    serde_json::to_value(content).map_err(|e| KernelError::Encoding(e.to_string()))
}

fn to_json<T: Serialize + ?Sized>(value: &T, part: &str) -> Result<Vec<u8>, KernelError> {
    serde_json::to_vec(value).map_err(|e| KernelError::Encoding(format!("{}: {}", part, e)))
}

/// Encode a complete message into its signed frames:
/// `[signature, header, parent_header, metadata, content, buffers...]`.
///
/// The delimiter and routing identities are not included; they are added when
/// the frames are handed to a socket.
pub fn encode(msg: &JupyterMessage, signer: &MessageSigner) -> Result<Vec<Vec<u8>>, KernelError> {
    let header = to_json(&msg.header, "header")?;

    // A missing parent header is sent as an empty object
    let parent_header = match &msg.parent_header {
        Some(parent) => to_json(parent, "parent_header")?,
        None => to_json(&serde_json::Map::new(), "parent_header")?,
    };

    let metadata = to_json(&msg.metadata, "metadata")?;
    let content = to_json(&msg.content, "content")?;

    // Compute the HMAC signature from all of the JSON parts
    let signature = signer.sign(&[
        header.as_slice(),
        parent_header.as_slice(),
        metadata.as_slice(),
        content.as_slice(),
    ]);

    let mut parts = Vec::with_capacity(PROTOCOL_FRAMES + msg.buffers.len());
    parts.push(signature.into_bytes());
    parts.push(header);
    parts.push(parent_header);
    parts.push(metadata);
    parts.push(content);
    parts.extend(msg.buffers.iter().cloned());
    Ok(parts)
}

fn parse_frame<T: DeserializeOwned>(frame: &[u8], index: usize) -> Result<T, KernelError> {
    serde_json::from_slice(frame).map_err(|e| KernelError::Decoding {
        frame: index,
        reason: e.to_string(),
    })
}

/// Decode protocol frames into a Jupyter message.
///
/// `frames` starts at the signature; routing identities and the delimiter
/// must already be stripped (see `WireMessage::from_zmq`). Everything after
/// the four JSON parts is an opaque buffer, whatever it contains. The
/// signature is checked before the JSON is parsed, so a tampered frame is
/// reported as a signature mismatch even when it no longer parses.
pub fn decode<F: AsRef<[u8]>>(
    frames: &[F],
    signer: &MessageSigner,
) -> Result<DecodedMessage, KernelError> {
    if frames.len() < PROTOCOL_FRAMES {
        return Err(KernelError::Decoding {
            frame: frames.len(),
            reason: format!(
                "expected at least {} message frames, got {}",
                PROTOCOL_FRAMES,
                frames.len()
            ),
        });
    }

    let json = [
        frames[1].as_ref(),
        frames[2].as_ref(),
        frames[3].as_ref(),
        frames[4].as_ref(),
    ];

    let signature = if !signer.is_signed() {
        SignatureCheck::Unsigned
    } else if signer.verify(frames[0].as_ref(), &json) {
        SignatureCheck::Valid
    } else {
        SignatureCheck::Mismatch
    };

    let message = match parse_message(&json, &frames[PROTOCOL_FRAMES..]) {
        Ok(message) => message,
        Err(err) if signature == SignatureCheck::Mismatch => {
            log::trace!("Unparseable message with bad signature: {}", err);
            return Err(KernelError::SignatureMismatch {
                msg_id: best_effort_msg_id(json[0]),
            });
        }
        Err(err) => return Err(err),
    };

    Ok(DecodedMessage {
        identities: Vec::new(),
        message,
        signature,
    })
}

fn parse_message<F: AsRef<[u8]>>(json: &[&[u8]; 4], buffers: &[F]) -> Result<JupyterMessage, KernelError> {
    let header: JupyterMessageHeader = parse_frame(json[0], 1)?;

    // An empty parent header means the message has no parent
    let parent_header: Value = parse_frame(json[1], 2)?;
    let parent_header = match parent_header {
        Value::Object(ref map) if map.is_empty() => None,
        other => Some(
            serde_json::from_value::<JupyterMessageHeader>(other).map_err(|e| {
                KernelError::Decoding {
                    frame: 2,
                    reason: e.to_string(),
                }
            })?,
        ),
    };

    Ok(JupyterMessage {
        header,
        parent_header,
        metadata: parse_frame(json[2], 3)?,
        content: parse_frame(json[3], 4)?,
        buffers: buffers.iter().map(|f| f.as_ref().to_vec()).collect(),
    })
}

fn best_effort_msg_id(header: &[u8]) -> String {
    serde_json::from_slice::<JupyterMessageHeader>(header)
        .map(|header| header.msg_id)
        .unwrap_or_default()
}

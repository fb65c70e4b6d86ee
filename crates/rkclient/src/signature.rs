//
// signature.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::fmt;

use hmac::{Hmac, Mac};
use rkshared::connection_info::ConnectionInfo;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::KernelError;

/// Signs and verifies the JSON parts of wire messages with the connection's
/// shared key.
#[derive(Clone)]
pub enum MessageSigner {
    /// No key or scheme; signatures are empty and never checked
    Unsigned,
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Sha512(Hmac<Sha512>),
}

impl fmt::Debug for MessageSigner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scheme = match self {
            MessageSigner::Unsigned => "unsigned",
            MessageSigner::Sha256(_) => "hmac-sha256",
            MessageSigner::Sha384(_) => "hmac-sha384",
            MessageSigner::Sha512(_) => "hmac-sha512",
        };
        write!(f, "MessageSigner({})", scheme)
    }
}

impl MessageSigner {
    /// Create a signer from a key and a signature scheme name. An empty key
    /// or scheme yields an unsigned signer.
    pub fn new(key: &str, scheme: &str) -> Result<Self, KernelError> {
        if key.is_empty() || scheme.is_empty() {
            return Ok(MessageSigner::Unsigned);
        }
        let key = key.as_bytes();
        let invalid_key = |_| KernelError::UnsupportedScheme(scheme.to_string());
        match scheme {
            "hmac-sha256" => Ok(MessageSigner::Sha256(
                Hmac::<Sha256>::new_from_slice(key).map_err(invalid_key)?,
            )),
            "hmac-sha384" => Ok(MessageSigner::Sha384(
                Hmac::<Sha384>::new_from_slice(key).map_err(invalid_key)?,
            )),
            "hmac-sha512" => Ok(MessageSigner::Sha512(
                Hmac::<Sha512>::new_from_slice(key).map_err(invalid_key)?,
            )),
            other => Err(KernelError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Create a signer from the key and scheme in a connection file.
    pub fn from_info(info: &ConnectionInfo) -> Result<Self, KernelError> {
        Self::new(&info.key, &info.signature_scheme)
    }

    pub fn is_signed(&self) -> bool {
        !matches!(self, MessageSigner::Unsigned)
    }

    /// Compute the lowercase hex signature over the given parts, in order.
    /// Unsigned signers produce an empty string.
    pub fn sign(&self, parts: &[&[u8]]) -> String {
        match self {
            MessageSigner::Unsigned => String::new(),
            MessageSigner::Sha256(mac) => hex::encode(digest(mac, parts).finalize().into_bytes()),
            MessageSigner::Sha384(mac) => hex::encode(digest(mac, parts).finalize().into_bytes()),
            MessageSigner::Sha512(mac) => hex::encode(digest(mac, parts).finalize().into_bytes()),
        }
    }

    /// Check a received hex signature against the given parts using a
    /// constant-time comparison. Always true for unsigned signers.
    pub fn verify(&self, signature: &[u8], parts: &[&[u8]]) -> bool {
        let expected = match self {
            MessageSigner::Unsigned => return true,
            _ => match hex::decode(signature) {
                Ok(bytes) => bytes,
                Err(_) => return false,
            },
        };
        match self {
            MessageSigner::Unsigned => true,
            MessageSigner::Sha256(mac) => digest(mac, parts).verify_slice(&expected).is_ok(),
            MessageSigner::Sha384(mac) => digest(mac, parts).verify_slice(&expected).is_ok(),
            MessageSigner::Sha512(mac) => digest(mac, parts).verify_slice(&expected).is_ok(),
        }
    }
}

fn digest<M: Mac + Clone>(mac: &M, parts: &[&[u8]]) -> M {
    let mut mac = mac.clone();
    for part in parts {
        mac.update(part);
    }
    mac
}

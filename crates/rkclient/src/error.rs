//
// error.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::time::Duration;

use rkshared::jupyter_message::{JupyterChannel, UnknownChannelName};

/// Errors surfaced by the kernel connection.
///
/// Cloneable so that failures on the iopub stream can be delivered to every
/// subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// A message part could not be serialized as JSON
    #[error("Failed to encode message: {0}")]
    Encoding(String),

    /// A received frame sequence was malformed; `frame` is the index of the
    /// offending frame counted from the signature frame
    #[error("Failed to decode frame {frame}: {reason}")]
    Decoding { frame: usize, reason: String },

    /// The signature on a received message did not match its contents
    #[error("Invalid signature on message {msg_id}")]
    SignatureMismatch { msg_id: String },

    /// A request with the same msg_id is still waiting for its reply on the
    /// channel, so a reply could not be told apart
    #[error("A request with msg_id {msg_id} is already waiting for a reply")]
    DuplicateMessageId { msg_id: String },

    /// The connection has been disposed
    #[error("The kernel connection is closed")]
    ConnectionClosed,

    /// No reply arrived within the caller's timeout
    #[error("No reply on {channel} after {timeout:?}")]
    Timeout {
        channel: JupyterChannel,
        timeout: Duration,
    },

    /// Messages cannot be sent on the given channel
    #[error("Cannot send on channel '{0}'")]
    UnknownChannel(String),

    /// The connection info names a signature scheme we can't compute
    #[error("Unsupported signature scheme '{0}'")]
    UnsupportedScheme(String),

    /// The connection info has no port for a channel
    #[error("Port not found for channel '{0}'")]
    MissingPort(JupyterChannel),

    /// The underlying ZeroMQ socket failed
    #[error("ZeroMQ transport error: {0}")]
    Transport(String),
}

impl From<zeromq::ZmqError> for KernelError {
    fn from(err: zeromq::ZmqError) -> Self {
        KernelError::Transport(err.to_string())
    }
}

impl From<UnknownChannelName> for KernelError {
    fn from(err: UnknownChannelName) -> Self {
        KernelError::UnknownChannel(err.0)
    }
}

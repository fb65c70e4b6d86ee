//
// jupyter_message.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The version of the Jupyter messaging protocol spoken by this client.
pub const JUPYTER_PROTOCOL_VERSION: &str = "5.3";

/// The header of a Jupyter message.
///
/// Every field defaults to an empty string so that a header omitted by the
/// caller (or sent as `{}` by a kernel) is still representable. Empty fields
/// are stamped by the connection before a message is sent.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct JupyterMessageHeader {
    /// The message ID; unique per message
    pub msg_id: String,

    /// The ID of the session that originated the message
    pub session: String,

    /// The name of the user who originated the message
    pub username: String,

    /// The date/time the message was created (ISO 8601)
    pub date: String,

    /// The type of the message
    pub msg_type: String,

    /// The version of the Jupyter protocol
    pub version: String,
}

impl JupyterMessageHeader {
    /// Create a header with the given message type and ID; the remaining
    /// fields are left empty.
    pub fn new(msg_type: &str, msg_id: &str) -> Self {
        Self {
            msg_id: msg_id.to_string(),
            msg_type: msg_type.to_string(),
            ..Default::default()
        }
    }
}

/// The set of all Jupyter sockets ("channels") over which messages are sent and
/// received.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JupyterChannel {
    /// The shell channel
    Shell,

    /// The control channel
    Control,

    /// The stdin channel
    Stdin,

    /// The iopub channel
    IOPub,

    /// The heartbeat channel
    #[serde(rename = "hb")]
    Heartbeat,
}

impl JupyterChannel {
    /// The name of the channel as used in connection files and logs.
    pub fn name(&self) -> &'static str {
        match self {
            JupyterChannel::Shell => "shell",
            JupyterChannel::Control => "control",
            JupyterChannel::Stdin => "stdin",
            JupyterChannel::IOPub => "iopub",
            JupyterChannel::Heartbeat => "hb",
        }
    }
}

impl fmt::Display for JupyterChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when parsing a channel name that is not one of the Jupyter
/// channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChannelName(pub String);

impl fmt::Display for UnknownChannelName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Unknown channel '{}'", self.0)
    }
}

impl std::error::Error for UnknownChannelName {}

impl FromStr for JupyterChannel {
    type Err = UnknownChannelName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shell" => Ok(JupyterChannel::Shell),
            "control" => Ok(JupyterChannel::Control),
            "stdin" => Ok(JupyterChannel::Stdin),
            "iopub" => Ok(JupyterChannel::IOPub),
            "hb" | "heartbeat" => Ok(JupyterChannel::Heartbeat),
            other => Err(UnknownChannelName(other.to_string())),
        }
    }
}

/// Names the `msg_type` of a typed message content.
pub trait MessageType {
    fn message_type() -> String;
}

/// A complete Jupyter message, ready to be encoded onto the wire (or freshly
/// decoded from it).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JupyterMessage {
    /// The header of the message
    pub header: JupyterMessageHeader,

    /// The header of the message's parent (the message that caused this
    /// message). `None` is sent as `{}`.
    pub parent_header: Option<JupyterMessageHeader>,

    /// Additional metadata
    pub metadata: Value,

    /// The message payload
    pub content: Value,

    /// The message buffers; raw binary frames following the JSON parts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffers: Vec<Vec<u8>>,
}

/// A message as supplied by a caller, where any part may be omitted.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PartialMessage {
    pub header: Option<JupyterMessageHeader>,
    pub parent_header: Option<JupyterMessageHeader>,
    pub metadata: Option<Value>,
    pub content: Option<Value>,
    pub buffers: Option<Vec<Vec<u8>>>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl JupyterMessage {
    /// Fill out any missing parts of a partial message with their empty
    /// defaults. Parts that are present are passed through unchanged.
    pub fn from_partial(partial: PartialMessage) -> Self {
        Self {
            header: partial.header.unwrap_or_default(),
            parent_header: partial.parent_header,
            metadata: partial.metadata.unwrap_or_else(empty_object),
            content: partial.content.unwrap_or_else(empty_object),
            buffers: partial.buffers.unwrap_or_default(),
        }
    }

    /// The msg_id of the parent message, if this message has a parent.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header
            .as_ref()
            .map(|parent| parent.msg_id.as_str())
            .filter(|msg_id| !msg_id.is_empty())
    }

    /// Deserialize the content into a typed structure.
    pub fn content_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.content.clone())
    }
}

impl From<JupyterMessage> for PartialMessage {
    fn from(msg: JupyterMessage) -> Self {
        Self {
            header: Some(msg.header),
            parent_header: msg.parent_header,
            metadata: Some(msg.metadata),
            content: Some(msg.content),
            buffers: Some(msg.buffers),
        }
    }
}

impl PartialMessage {
    /// Start a request of the given type with the given content. The rest of
    /// the header is stamped when the message is sent.
    pub fn request(msg_type: &str, content: Value) -> Self {
        Self {
            header: Some(JupyterMessageHeader::new(msg_type, "")),
            content: Some(content),
            ..Default::default()
        }
    }

    /// Start a request from typed content; fails if the content cannot be
    /// represented as JSON.
    pub fn from_content<T: MessageType + Serialize>(content: &T) -> Result<Self, serde_json::Error> {
        let content = serde_json::to_value(content)?;
        Ok(Self::request(T::message_type().as_str(), content))
    }

    /// Set the parent header (the message this one answers).
    pub fn with_parent(mut self, parent: JupyterMessageHeader) -> Self {
        self.parent_header = Some(parent);
        self
    }

    /// Fix the message's msg_id up front, e.g. to pick out the iopub output
    /// that belongs to it before the reply arrives.
    pub fn with_msg_id(mut self, msg_id: &str) -> Self {
        self.header
            .get_or_insert_with(JupyterMessageHeader::default)
            .msg_id = msg_id.to_string();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_buffers(mut self, buffers: Vec<Vec<u8>>) -> Self {
        self.buffers = Some(buffers);
        self
    }
}

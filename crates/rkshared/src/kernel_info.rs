/*
 * kernel_info.rs
 *
 * Copyright (C) 2025 Posit Software, PBC. All rights reserved.
 *
 */

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::jupyter_message::MessageType;

/// Represents a kernel_info_request; it has no content
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KernelInfoRequest {}

impl MessageType for KernelInfoRequest {
    fn message_type() -> String {
        String::from("kernel_info_request")
    }
}

/// Represents a help link advertised by the kernel
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HelpLink {
    /// The text to display for the link
    pub text: String,

    /// The location (URL) of the help link
    pub url: String,
}

/// Represents information about the language that the kernel implements
#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LanguageInfo {
    /// The name of the programming language the kernel implements
    pub name: String,

    /// The version of the language
    #[serde(default)]
    pub version: String,

    /// The MIME type for script files in the language
    #[serde(default)]
    pub mimetype: String,

    /// The file extension for script files in the language
    #[serde(default)]
    pub file_extension: String,

    /// Pygments lexer (for highlighting), if different than `name`
    pub pygments_lexer: Option<String>,

    /// Codemirror mode; either a name or a mode configuration object
    pub codemirror_mode: Option<Value>,

    /// Nbconvert exporter, if not the default 'script' exporter
    pub nbconvert_exporter: Option<String>,
}

/// Represents a reply to a kernel_info_request
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KernelInfoReply {
    /// The reply status ("ok" or "error")
    pub status: String,

    /// Version of messaging protocol spoken by the kernel
    pub protocol_version: String,

    /// The kernel implementation name (e.g. "ipython")
    #[serde(default)]
    pub implementation: String,

    /// The kernel implementation version
    #[serde(default)]
    pub implementation_version: String,

    /// Information about the language the kernel supports
    pub language_info: LanguageInfo,

    /// A startup banner
    #[serde(default)]
    pub banner: String,

    /// Whether debugging is supported
    #[serde(default)]
    pub debugger: bool,

    /// A list of help links
    #[serde(default)]
    pub help_links: Vec<HelpLink>,
}

impl MessageType for KernelInfoReply {
    fn message_type() -> String {
        String::from("kernel_info_reply")
    }
}

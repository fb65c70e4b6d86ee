//
// connection_info.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use serde::{Deserialize, Serialize};

use crate::jupyter_message::JupyterChannel;

/// The contents of a kernel connection file, as listed in the Jupyter
/// specification; directly parsed from JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// The connection file format version, if the launcher wrote one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    /// The port for the shell channel
    pub shell_port: u16,

    /// The port for the IOPub channel
    pub iopub_port: u16,

    /// The port for the stdin channel
    pub stdin_port: u16,

    /// The port for the control channel
    pub control_port: u16,

    /// The port for the heartbeat channel
    pub hb_port: u16,

    /// The IP address (or, for IPC, the path prefix) the kernel is bound to
    pub ip: String,

    /// The transport protocol (e.g. "tcp" or "ipc")
    pub transport: String,

    /// The key used to sign messages; empty for unsigned messages
    #[serde(default)]
    pub key: String,

    /// The signature scheme (e.g. "hmac-sha256"); empty for unsigned messages
    #[serde(default)]
    pub signature_scheme: String,

    /// The name of the kernel, if the launcher recorded it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

impl ConnectionInfo {
    /// The port assigned to the given channel.
    pub fn port(&self, channel: JupyterChannel) -> u16 {
        match channel {
            JupyterChannel::Shell => self.shell_port,
            JupyterChannel::Control => self.control_port,
            JupyterChannel::Stdin => self.stdin_port,
            JupyterChannel::IOPub => self.iopub_port,
            JupyterChannel::Heartbeat => self.hb_port,
        }
    }

    /// Given a channel, return a URI-like string that can be used to connect
    /// to its socket.
    ///
    /// TCP endpoints separate the address and port with a colon; other
    /// transports (IPC) use a hyphen, since the "address" is a path prefix.
    ///
    /// Example: shell on port `32` => `"tcp://127.0.0.1:32"`
    pub fn endpoint(&self, channel: JupyterChannel) -> String {
        let delimiter = if self.transport == "tcp" { ':' } else { '-' };
        format!(
            "{}://{}{}{}",
            self.transport,
            self.ip,
            delimiter,
            self.port(channel)
        )
    }

    /// Whether messages on this connection are signed. Both a key and a
    /// scheme are required.
    pub fn is_signed(&self) -> bool {
        !self.key.is_empty() && !self.signature_scheme.is_empty()
    }
}

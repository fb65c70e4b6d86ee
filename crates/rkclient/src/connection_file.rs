//
// connection_file.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::fs::File;
use std::io::BufReader;
use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::Context;
use rand::Rng;
use rkshared::connection_info::ConnectionInfo;
use rkshared::port_picker::pick_unused_tcp_ports;
use serde::Deserialize;
use serde::Serialize;

/// A kernel connection file: the `ConnectionInfo` a kernel launcher writes to
/// disk for the kernel and its clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionFile {
    pub info: ConnectionInfo,
}

impl ConnectionFile {
    /// Create a ConnectionFile from a ConnectionInfo struct.
    pub fn from_info(info: ConnectionInfo) -> Self {
        Self { info }
    }

    /// Create a ConnectionFile by parsing the contents of a connection file.
    pub fn from_file<P: AsRef<Path>>(connection_file: P) -> Result<Self, anyhow::Error> {
        let path = connection_file.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open connection file {}", path.display()))?;
        let reader = BufReader::new(file);
        let info: ConnectionInfo = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse connection file {}", path.display()))?;

        log::debug!(
            "Read connection file {}: shell={}, iopub={}, stdin={}, control={}, hb={}",
            path.display(),
            info.shell_port,
            info.iopub_port,
            info.stdin_port,
            info.control_port,
            info.hb_port
        );
        Ok(Self { info })
    }

    /// Write the connection info to disk as pretty-printed JSON.
    pub fn to_file<P: AsRef<Path>>(&self, connection_file: P) -> Result<(), anyhow::Error> {
        let path = connection_file.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create connection file {}", path.display()))?;
        serde_json::to_writer_pretty(file, &self.info)?;
        Ok(())
    }

    /// Generate a new ConnectionFile by picking free ports and a random
    /// signing key.
    ///
    /// # Arguments
    ///
    /// * `ip` - The IPv4 address the kernel should bind to
    pub fn generate(ip: Ipv4Addr) -> Result<Self, anyhow::Error> {
        let key_bytes = rand::thread_rng().gen::<[u8; 16]>();
        let key = hex::encode(key_bytes);

        let ports = pick_unused_tcp_ports(ip, 5).ok_or_else(|| {
            anyhow::anyhow!("Failed to pick kernel ports; no free ports available on {}", ip)
        })?;
        log::trace!("Picked kernel ports: {:?}", ports);

        let info = ConnectionInfo {
            version: None,
            control_port: ports[0],
            shell_port: ports[1],
            iopub_port: ports[2],
            hb_port: ports[3],
            stdin_port: ports[4],
            ip: ip.to_string(),
            transport: "tcp".to_string(),
            key,
            signature_scheme: "hmac-sha256".to_string(),
            kernel_name: None,
        };
        Ok(Self { info })
    }
}

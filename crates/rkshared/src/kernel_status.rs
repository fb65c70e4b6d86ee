//
// kernel_status.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::fmt;

use serde::{Deserialize, Serialize};

/// The execution state a kernel reports in iopub `status` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// The kernel is starting up
    Starting,
    /// The kernel is idle
    Idle,
    /// The kernel is busy
    Busy,
}

/// Liveness of the kernel as seen by the heartbeat monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    /// No heartbeat has been exchanged yet (or monitoring is disabled)
    Unknown,
    /// The kernel echoed the last heartbeat
    Alive,
    /// The kernel has not responded to a heartbeat in the expected time
    Offline,
}

impl fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeartbeatStatus::Unknown => write!(f, "unknown"),
            HeartbeatStatus::Alive => write!(f, "alive"),
            HeartbeatStatus::Offline => write!(f, "offline"),
        }
    }
}

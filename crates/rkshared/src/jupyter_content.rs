//
// jupyter_content.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! Typed content for the Jupyter messages this client sends and understands.
//! These sit on top of the open JSON content carried by `JupyterMessage`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jupyter_message::MessageType;
use crate::kernel_status::ExecutionState;

/// Represents an execute_request, sent on the shell channel
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExecuteRequest {
    /// The code to execute
    pub code: String,

    /// Whether to execute the code as quietly as possible
    #[serde(default)]
    pub silent: bool,

    /// Whether to record the code in the kernel's history
    #[serde(default = "default_true")]
    pub store_history: bool,

    /// Expressions to evaluate after the code runs
    #[serde(default)]
    pub user_expressions: serde_json::Map<String, Value>,

    /// Whether the kernel may send input_request messages on stdin
    #[serde(default)]
    pub allow_stdin: bool,

    /// Whether to abort the execution queue if an error occurs
    #[serde(default = "default_true")]
    pub stop_on_error: bool,
}

fn default_true() -> bool {
    true
}

impl ExecuteRequest {
    /// An execute request for the given code with the usual defaults.
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            silent: false,
            store_history: true,
            user_expressions: serde_json::Map::new(),
            allow_stdin: false,
            stop_on_error: true,
        }
    }
}

impl MessageType for ExecuteRequest {
    fn message_type() -> String {
        String::from("execute_request")
    }
}

/// Represents an execute_reply
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExecuteReply {
    /// "ok", "error", or "aborted"
    pub status: String,

    /// The execution counter
    #[serde(default)]
    pub execution_count: Option<u32>,

    /// Results of any user expressions
    #[serde(default)]
    pub user_expressions: Option<Value>,
}

impl MessageType for ExecuteReply {
    fn message_type() -> String {
        String::from("execute_reply")
    }
}

/// Represents a status message on iopub
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KernelStatusMessage {
    pub execution_state: ExecutionState,
}

impl MessageType for KernelStatusMessage {
    fn message_type() -> String {
        String::from("status")
    }
}

/// Represents a stream message (stdout/stderr) on iopub
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StreamOutput {
    /// "stdout" or "stderr"
    pub name: String,

    /// The text written to the stream
    pub text: String,
}

impl MessageType for StreamOutput {
    fn message_type() -> String {
        String::from("stream")
    }
}

/// Represents an error message on iopub (or the content of an error reply)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExecuteError {
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl MessageType for ExecuteError {
    fn message_type() -> String {
        String::from("error")
    }
}

/// Represents an input_request, sent by the kernel on stdin
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InputRequest {
    /// The prompt to show the user
    pub prompt: String,

    /// Whether the input is a password and should not be echoed
    #[serde(default)]
    pub password: bool,
}

impl MessageType for InputRequest {
    fn message_type() -> String {
        String::from("input_request")
    }
}

/// Represents an input_reply, sent by the client on stdin
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InputReply {
    /// The text the user entered
    pub value: String,
}

impl MessageType for InputReply {
    fn message_type() -> String {
        String::from("input_reply")
    }
}

/// Represents an interrupt_request, sent on control; it has no content
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct InterruptRequest {}

impl MessageType for InterruptRequest {
    fn message_type() -> String {
        String::from("interrupt_request")
    }
}

/// Represents a shutdown_request, sent on control
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ShutdownRequest {
    /// Whether the kernel should restart after shutting down
    pub restart: bool,
}

impl MessageType for ShutdownRequest {
    fn message_type() -> String {
        String::from("shutdown_request")
    }
}

/// Represents a shutdown_reply
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ShutdownReply {
    #[serde(default)]
    pub status: Option<String>,
    pub restart: bool,
}

impl MessageType for ShutdownReply {
    fn message_type() -> String {
        String::from("shutdown_reply")
    }
}

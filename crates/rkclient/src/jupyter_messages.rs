//
// jupyter_messages.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use rkshared::jupyter_content::{
    ExecuteError, ExecuteReply, InputRequest, KernelStatusMessage, ShutdownReply, StreamOutput,
};
use rkshared::jupyter_message::JupyterMessage;
use rkshared::kernel_info::KernelInfoReply;

/// An enum of message types we know how to handle from the kernel. This is in
/// no way exhaustive; it just includes the types we care about.
#[derive(Debug, Clone)]
pub enum JupyterMsg {
    KernelInfoReply(KernelInfoReply),
    ExecuteReply(ExecuteReply),
    Status(KernelStatusMessage),
    Stream(StreamOutput),
    Error(ExecuteError),
    InputRequest(InputRequest),
    ShutdownReply(ShutdownReply),
    Other,
}

/// Convert a JupyterMessage (generic type) into a JupyterMsg (specific type).
/// Content that doesn't match the expected shape becomes `Other`.
impl From<JupyterMessage> for JupyterMsg {
    fn from(msg: JupyterMessage) -> Self {
        let parsed = match msg.header.msg_type.as_str() {
            "kernel_info_reply" => msg.content_as().map(JupyterMsg::KernelInfoReply),
            "execute_reply" => msg.content_as().map(JupyterMsg::ExecuteReply),
            "status" => msg.content_as().map(JupyterMsg::Status),
            "stream" => msg.content_as().map(JupyterMsg::Stream),
            "error" => msg.content_as().map(JupyterMsg::Error),
            "input_request" => msg.content_as().map(JupyterMsg::InputRequest),
            "shutdown_reply" => msg.content_as().map(JupyterMsg::ShutdownReply),
            _ => return JupyterMsg::Other,
        };
        parsed.unwrap_or(JupyterMsg::Other)
    }
}

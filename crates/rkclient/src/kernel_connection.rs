//
// kernel_connection.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use rkshared::connection_info::ConnectionInfo;
use rkshared::jupyter_content::{
    ExecuteRequest, InputReply, InterruptRequest, ShutdownReply, ShutdownRequest,
};
use rkshared::jupyter_message::{
    JupyterChannel, JupyterMessage, JupyterMessageHeader, MessageType, PartialMessage,
};
use rkshared::kernel_info::{KernelInfoReply, KernelInfoRequest};
use rkshared::kernel_status::HeartbeatStatus;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch};

use crate::channel_socket::{ChannelRequest, ChannelSocket, STDIN_CAPACITY};
use crate::close_signal::CloseSignal;
use crate::error::KernelError;
use crate::heartbeat::HeartbeatMonitor;
use crate::iopub::{IopubEvent, IopubListener, IOPUB_CAPACITY};
use crate::signature::MessageSigner;
use crate::wire_message::{to_content, WireMessage};
use crate::wire_message_header::{make_message_id, stamp_header};

/// Client-side settings for a kernel connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// The session ID stamped into outgoing headers and used as the socket
    /// identity; a random one is generated when not given
    pub session_id: Option<String>,

    /// The username stamped into outgoing headers
    pub username: String,

    /// How long shell and control requests wait for a reply by default;
    /// `None` waits indefinitely
    pub request_timeout: Option<Duration>,

    /// How often to send heartbeats; `None` disables heartbeat monitoring
    pub heartbeat_interval: Option<Duration>,

    /// How long to wait for the kernel to echo a heartbeat
    pub heartbeat_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            username: std::env::var("USER").unwrap_or_else(|_| String::from("username")),
            request_timeout: None,
            heartbeat_interval: None,
            heartbeat_timeout: Duration::from_secs(5),
        }
    }
}

/// A connection to a running kernel over its shell, control, stdin, and iopub
/// channels.
///
/// Each channel's socket is owned by its own background task, so a request
/// waiting on shell never holds up control or iopub.
pub struct KernelConnection {
    info: ConnectionInfo,
    session_id: String,
    username: String,
    request_timeout: Option<Duration>,
    signer: Arc<MessageSigner>,
    shell_tx: Sender<ChannelRequest>,
    control_tx: Sender<ChannelRequest>,
    stdin_tx: Sender<ChannelRequest>,
    stdin_rx: Receiver<JupyterMessage>,
    iopub_tx: broadcast::Sender<IopubEvent>,
    heartbeat_rx: watch::Receiver<HeartbeatStatus>,
    close: CloseSignal,
}

impl KernelConnection {
    /// Connect to the kernel described by `info`. All four channel sockets
    /// are connected (and iopub subscribed to every topic) before this
    /// returns.
    pub async fn connect(
        info: ConnectionInfo,
        options: ConnectionOptions,
    ) -> Result<Self, KernelError> {
        let mut channels = vec![
            JupyterChannel::Shell,
            JupyterChannel::Control,
            JupyterChannel::Stdin,
            JupyterChannel::IOPub,
        ];
        if options.heartbeat_interval.is_some() {
            channels.push(JupyterChannel::Heartbeat);
        }
        if let Some(channel) = channels.into_iter().find(|c| info.port(*c) == 0) {
            return Err(KernelError::MissingPort(channel));
        }

        let signer = Arc::new(MessageSigner::from_info(&info)?);
        let session_id = options.session_id.clone().unwrap_or_else(make_message_id);
        let close = CloseSignal::new();

        let (shell_tx, shell_rx) = async_channel::unbounded();
        let (control_tx, control_rx) = async_channel::unbounded();
        let (stdin_tx, stdin_requests_rx) = async_channel::unbounded();
        let (stdin_inbound_tx, stdin_rx) = async_channel::bounded(STDIN_CAPACITY);
        let (iopub_tx, _) = broadcast::channel(IOPUB_CAPACITY);

        // Connect everything before starting any socket task, so a failure
        // part way through leaves nothing running
        let iopub = IopubListener::connect(
            &info.endpoint(JupyterChannel::IOPub),
            &session_id,
            signer.clone(),
            iopub_tx.clone(),
            close.clone(),
        )
        .await?;
        let shell = ChannelSocket::connect(
            JupyterChannel::Shell,
            &info.endpoint(JupyterChannel::Shell),
            &session_id,
            signer.clone(),
            shell_rx,
            None,
            close.clone(),
        )
        .await?;
        let control = ChannelSocket::connect(
            JupyterChannel::Control,
            &info.endpoint(JupyterChannel::Control),
            &session_id,
            signer.clone(),
            control_rx,
            None,
            close.clone(),
        )
        .await?;
        let stdin = ChannelSocket::connect(
            JupyterChannel::Stdin,
            &info.endpoint(JupyterChannel::Stdin),
            &session_id,
            signer.clone(),
            stdin_requests_rx,
            Some(stdin_inbound_tx),
            close.clone(),
        )
        .await?;

        iopub.spawn();
        shell.spawn();
        control.spawn();
        stdin.spawn();

        let (heartbeat_tx, heartbeat_rx) = watch::channel(HeartbeatStatus::Unknown);
        if let Some(interval) = options.heartbeat_interval {
            HeartbeatMonitor::new(
                session_id.clone(),
                info.endpoint(JupyterChannel::Heartbeat),
                interval,
                options.heartbeat_timeout,
                heartbeat_tx,
                close.clone(),
            )
            .monitor();
        }

        log::debug!(
            "[session {}] Connected to kernel at {} ({}, {})",
            session_id,
            info.ip,
            info.transport,
            if signer.is_signed() {
                info.signature_scheme.as_str()
            } else {
                "unsigned"
            }
        );

        Ok(Self {
            info,
            session_id,
            username: options.username,
            request_timeout: options.request_timeout,
            signer,
            shell_tx,
            control_tx,
            stdin_tx,
            stdin_rx,
            iopub_tx,
            heartbeat_rx,
            close,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn is_disposed(&self) -> bool {
        self.close.is_closed()
    }

    /// Send a message on the shell, control, or stdin channel.
    ///
    /// Shell and control requests resolve with the kernel's reply; stdin
    /// messages resolve with `None` once written. Uses the connection's
    /// default request timeout.
    pub async fn send(
        &self,
        partial: PartialMessage,
        channel: JupyterChannel,
    ) -> Result<Option<JupyterMessage>, KernelError> {
        self.send_with_timeout(partial, channel, self.request_timeout)
            .await
    }

    /// Like `send`, with an explicit reply timeout. A request that times out
    /// is not retried; the kernel may still act on it.
    pub async fn send_with_timeout(
        &self,
        partial: PartialMessage,
        channel: JupyterChannel,
        timeout: Option<Duration>,
    ) -> Result<Option<JupyterMessage>, KernelError> {
        let requests = match channel {
            JupyterChannel::Shell => &self.shell_tx,
            JupyterChannel::Control => &self.control_tx,
            JupyterChannel::Stdin => &self.stdin_tx,
            other => return Err(KernelError::UnknownChannel(other.to_string())),
        };
        if self.is_disposed() {
            return Err(KernelError::ConnectionClosed);
        }

        let mut message = JupyterMessage::from_partial(partial);
        stamp_header(&mut message.header, &self.session_id, &self.username);
        let msg_id = message.header.msg_id.clone();
        let wire_message = WireMessage::from_jupyter(&message, &self.signer)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ChannelRequest {
            msg_id: msg_id.clone(),
            message: wire_message,
            expects_reply: channel != JupyterChannel::Stdin,
            reply_tx,
        };
        requests
            .send(request)
            .await
            .map_err(|_| KernelError::ConnectionClosed)?;

        let reply = match timeout {
            Some(duration) => match tokio::time::timeout(duration, reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    log::warn!(
                        "[session {}] No reply to {} {} after {:?}",
                        self.session_id,
                        channel,
                        msg_id,
                        duration
                    );
                    return Err(KernelError::Timeout {
                        channel,
                        timeout: duration,
                    });
                }
            },
            None => reply_rx.await,
        };

        // A dropped reply sender means the socket task shut down
        reply.unwrap_or(Err(KernelError::ConnectionClosed))
    }

    /// Send typed content as a new request on the given channel.
    pub async fn request<T: MessageType + Serialize>(
        &self,
        content: &T,
        channel: JupyterChannel,
    ) -> Result<Option<JupyterMessage>, KernelError> {
        let content = to_content(content)?;
        let partial = PartialMessage::request(&T::message_type(), content);
        self.send(partial, channel).await
    }

    async fn request_reply<T: MessageType + Serialize>(
        &self,
        content: &T,
        channel: JupyterChannel,
    ) -> Result<JupyterMessage, KernelError> {
        self.request(content, channel).await?.ok_or_else(|| {
            KernelError::Transport(format!("No reply to {} on {}", T::message_type(), channel))
        })
    }

    /// Ask the kernel to describe itself.
    pub async fn kernel_info(&self) -> Result<KernelInfoReply, KernelError> {
        let reply = self
            .request_reply(&KernelInfoRequest::default(), JupyterChannel::Shell)
            .await?;
        typed_content(&reply)
    }

    /// Execute code on the shell channel and return the execute_reply.
    /// Output arrives separately on iopub, parented to the request.
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<JupyterMessage, KernelError> {
        self.request_reply(request, JupyterChannel::Shell).await
    }

    /// Interrupt the kernel via the control channel.
    pub async fn interrupt(&self) -> Result<JupyterMessage, KernelError> {
        self.request_reply(&InterruptRequest::default(), JupyterChannel::Control)
            .await
    }

    /// Ask the kernel to shut down (and optionally restart) via the control
    /// channel.
    pub async fn shutdown(&self, restart: bool) -> Result<ShutdownReply, KernelError> {
        let reply = self
            .request_reply(&ShutdownRequest { restart }, JupyterChannel::Control)
            .await?;
        typed_content(&reply)
    }

    /// Answer a kernel's input_request on the stdin channel.
    pub async fn input_reply(
        &self,
        value: &str,
        parent: &JupyterMessageHeader,
    ) -> Result<(), KernelError> {
        let content = to_content(&InputReply {
            value: value.to_string(),
        })?;
        let partial = PartialMessage::request(&InputReply::message_type(), content)
            .with_parent(parent.clone());
        self.send(partial, JupyterChannel::Stdin).await?;
        Ok(())
    }

    /// Subscribe to the kernel's iopub broadcasts. Each subscriber receives
    /// every message published after it subscribed.
    pub fn subscribe_iopub(&self) -> broadcast::Receiver<IopubEvent> {
        self.iopub_tx.subscribe()
    }

    /// Messages the kernel initiates on stdin, such as input requests.
    pub fn stdin_requests(&self) -> Receiver<JupyterMessage> {
        self.stdin_rx.clone()
    }

    /// The kernel's liveness according to the heartbeat monitor; always
    /// `Unknown` when monitoring is disabled.
    pub fn heartbeat_status(&self) -> watch::Receiver<HeartbeatStatus> {
        self.heartbeat_rx.clone()
    }

    /// Close all channel sockets. Pending requests fail with
    /// `ConnectionClosed`; calling this again does nothing.
    pub fn dispose(&self) {
        if !self.close.close() {
            return;
        }
        log::debug!("[session {}] Closing kernel connection", self.session_id);
    }
}

impl Drop for KernelConnection {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn typed_content<T: DeserializeOwned>(reply: &JupyterMessage) -> Result<T, KernelError> {
    reply.content_as().map_err(|e| KernelError::Decoding {
        frame: 4,
        reason: format!("{} content: {}", reply.header.msg_type, e),
    })
}

//
// iopub.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::sync::Arc;

use rkshared::jupyter_message::JupyterMessage;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use zeromq::{Socket, SocketRecv, SubSocket, ZmqMessage};

use crate::close_signal::CloseSignal;
use crate::error::KernelError;
use crate::signature::MessageSigner;
use crate::wire_message::{DecodedMessage, WireMessage};

/// One item of the iopub stream: a verified broadcast, or the reason a
/// broadcast was rejected.
pub type IopubEvent = Result<JupyterMessage, KernelError>;

/// How many undelivered iopub events a subscriber may fall behind by before it
/// starts losing them.
pub const IOPUB_CAPACITY: usize = 1024;

/// Owns the SUB socket for the iopub channel and republishes everything the
/// kernel broadcasts to all subscribers.
pub struct IopubListener {
    session_id: String,
    socket: SubSocket,
    signer: Arc<MessageSigner>,
    events: broadcast::Sender<IopubEvent>,
    close: CloseSignal,
}

impl IopubListener {
    /// Connect to the iopub endpoint and subscribe to all topics.
    pub async fn connect(
        endpoint: &str,
        session_id: &str,
        signer: Arc<MessageSigner>,
        events: broadcast::Sender<IopubEvent>,
        close: CloseSignal,
    ) -> Result<Self, KernelError> {
        let mut socket = SubSocket::new();
        socket.connect(endpoint).await?;

        // Subscribe to all messages
        socket.subscribe("").await?;
        log::trace!(
            "[session {}] Connected to iopub socket at {}",
            session_id,
            endpoint
        );

        Ok(Self {
            session_id: session_id.to_string(),
            socket,
            signer,
            events,
            close,
        })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.close.wait() => {
                    break;
                },
                msg = self.socket.recv() => {
                    match msg {
                        Ok(msg) => self.publish(msg),
                        Err(e) => {
                            log::error!(
                                "[session {}] Failed to receive message from iopub socket: {}",
                                self.session_id,
                                e
                            );
                            break;
                        }
                    }
                },
            }
        }

        for e in self.socket.close().await {
            log::debug!("[session {}] Error closing iopub socket: {}", self.session_id, e);
        }
        log::trace!("[session {}] Closed iopub socket", self.session_id);
    }

    /// Decode a broadcast and hand it to subscribers. Failures are published
    /// too; one bad message doesn't end the stream.
    fn publish(&self, msg: ZmqMessage) {
        let event = WireMessage::from_zmq(msg)
            .decode(&self.signer)
            .and_then(DecodedMessage::verified);

        match &event {
            Ok(message) => log::trace!(
                "[session {}] Received iopub {} message {}",
                self.session_id,
                message.header.msg_type,
                message.header.msg_id
            ),
            Err(err @ KernelError::SignatureMismatch { .. }) => log::error!(
                "[session {}] Rejecting iopub message: {}",
                self.session_id,
                err
            ),
            Err(err) => log::warn!(
                "[session {}] Invalid iopub message: {}",
                self.session_id,
                err
            ),
        }

        // An error here only means nobody is subscribed right now
        let _ = self.events.send(event);
    }
}

//
// channel_socket.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_channel::{Receiver, Sender, TrySendError};
use rkshared::jupyter_message::{JupyterChannel, JupyterMessage};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use zeromq::{
    util::PeerIdentity, DealerSocket, Socket, SocketOptions, SocketRecv, SocketSend, ZmqMessage,
};

use crate::close_signal::CloseSignal;
use crate::error::KernelError;
use crate::signature::MessageSigner;
use crate::wire_message::{DecodedMessage, WireMessage};

/// Delivers the outcome of a request to the caller of `send`. `None` means the
/// message was written and no reply is expected.
pub type ReplySender = oneshot::Sender<Result<Option<JupyterMessage>, KernelError>>;

/// How many kernel-initiated messages are held for `inbound` before further
/// ones are dropped.
pub const STDIN_CAPACITY: usize = 64;

/// A message queued for delivery on a channel socket.
pub struct ChannelRequest {
    /// The ID of the outgoing message; replies name it as their parent
    pub msg_id: String,

    /// The encoded message
    pub message: WireMessage,

    /// Whether to wait for a reply after the message is written
    pub expects_reply: bool,

    pub reply_tx: ReplySender,
}

/// Owns the DEALER socket for one of the shell, control, or stdin channels.
///
/// Requests arrive over an async channel and are written to the socket;
/// replies are matched to pending requests by their parent's msg_id. Inbound
/// messages that answer no pending request are forwarded to `inbound` when
/// there is one (stdin, where the kernel initiates input requests), and
/// discarded otherwise. `inbound` is never awaited: when it is full the
/// message is dropped so replies keep flowing.
pub struct ChannelSocket {
    channel: JupyterChannel,
    session_id: String,
    socket: DealerSocket,
    signer: Arc<MessageSigner>,
    requests: Receiver<ChannelRequest>,
    inbound: Option<Sender<JupyterMessage>>,
    close: CloseSignal,
    pending: HashMap<String, ReplySender>,
}

/// Creates the socket options for DEALER sockets to set the peer identity
/// to the session ID.
fn dealer_peer_opts(session_id: &str) -> Result<SocketOptions, KernelError> {
    let mut peer_opts = SocketOptions::default();
    let peer_id = PeerIdentity::from_str(session_id)?;
    peer_opts.peer_identity(peer_id);
    Ok(peer_opts)
}

impl ChannelSocket {
    /// Create a DEALER socket and connect it to the channel's endpoint.
    pub async fn connect(
        channel: JupyterChannel,
        endpoint: &str,
        session_id: &str,
        signer: Arc<MessageSigner>,
        requests: Receiver<ChannelRequest>,
        inbound: Option<Sender<JupyterMessage>>,
        close: CloseSignal,
    ) -> Result<Self, KernelError> {
        let mut socket = DealerSocket::with_options(dealer_peer_opts(session_id)?);
        socket.connect(endpoint).await?;
        log::trace!(
            "[session {}] Connected to {} socket at {}",
            session_id,
            channel,
            endpoint
        );

        Ok(Self {
            channel,
            session_id: session_id.to_string(),
            socket,
            signer,
            requests,
            inbound,
            close,
            pending: HashMap::new(),
        })
    }

    /// Run the socket loop in the background until the connection closes.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.close.wait() => {
                    break;
                },
                request = self.requests.recv() => {
                    match request {
                        Ok(request) => self.send_request(request).await,
                        // The connection was dropped
                        Err(_) => break,
                    }
                },
                msg = self.socket.recv() => {
                    match msg {
                        Ok(msg) => self.dispatch(msg),
                        Err(e) => {
                            log::error!(
                                "[session {}] Failed to receive message from {} socket: {}",
                                self.session_id,
                                self.channel,
                                e
                            );
                            self.fail_pending(KernelError::from(e));
                            break;
                        }
                    }
                },
            }
        }

        self.fail_pending(KernelError::ConnectionClosed);

        // Refuse further requests and fail the ones still queued
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            let _ = request.reply_tx.send(Err(KernelError::ConnectionClosed));
        }

        let errors = self.socket.close().await;
        for e in errors {
            log::debug!(
                "[session {}] Error closing {} socket: {}",
                self.session_id,
                self.channel,
                e
            );
        }
        log::trace!("[session {}] Closed {} socket", self.session_id, self.channel);
    }

    async fn send_request(&mut self, request: ChannelRequest) {
        let ChannelRequest {
            msg_id,
            message,
            expects_reply,
            reply_tx,
        } = request;

        if expects_reply {
            self.prune_abandoned();
            if self.pending.contains_key(&msg_id) {
                log::warn!(
                    "[session {}] Refusing to send {} on {}: msg_id already in flight",
                    self.session_id,
                    msg_id,
                    self.channel
                );
                let _ = reply_tx.send(Err(KernelError::DuplicateMessageId { msg_id }));
                return;
            }
        }

        log::trace!(
            "[session {}] Sending message {} to {} socket",
            self.session_id,
            msg_id,
            self.channel
        );
        let zmq_message: ZmqMessage = message.into();
        if let Err(e) = self.socket.send(zmq_message).await {
            log::error!(
                "[session {}] Failed to send message {} to {} socket: {}",
                self.session_id,
                msg_id,
                self.channel,
                e
            );
            let _ = reply_tx.send(Err(e.into()));
            return;
        }

        if expects_reply {
            self.pending.insert(msg_id, reply_tx);
        } else {
            let _ = reply_tx.send(Ok(None));
        }
    }

    fn dispatch(&mut self, msg: ZmqMessage) {
        let decoded = WireMessage::from_zmq(msg)
            .decode(&self.signer)
            .and_then(DecodedMessage::verified);

        let message = match decoded {
            Ok(message) => message,
            Err(err) => {
                self.report_invalid(err);
                return;
            }
        };

        self.prune_abandoned();
        let waiting = message
            .parent_msg_id()
            .and_then(|parent_id| self.pending.remove(parent_id));
        match waiting {
            Some(reply_tx) => {
                log::trace!(
                    "[session {}] Received {} reply {} on {}",
                    self.session_id,
                    message.header.msg_type,
                    message.header.msg_id,
                    self.channel
                );
                if reply_tx.send(Ok(Some(message))).is_err() {
                    log::debug!(
                        "[session {}] Caller stopped waiting for {} reply",
                        self.session_id,
                        self.channel
                    );
                }
            }
            None => match &self.inbound {
                Some(inbound) => match inbound.try_send(message) {
                    Ok(()) => {}
                    Err(TrySendError::Full(message)) => {
                        log::warn!(
                            "[session {}] Dropping {} message {}: {} queued messages not yet read",
                            self.session_id,
                            self.channel,
                            message.header.msg_id,
                            inbound.len()
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::trace!(
                            "[session {}] No receiver for {} message",
                            self.session_id,
                            self.channel
                        );
                    }
                },
                None => {
                    log::warn!(
                        "[session {}] Discarding {} message with unexpected parent msg_id: {}",
                        self.session_id,
                        self.channel,
                        message.header.msg_id
                    );
                }
            },
        }
    }

    /// Report a message that failed to decode or verify. With exactly one
    /// request in flight the failure must belong to it, so it goes to that
    /// caller; otherwise it can't be attributed and is only logged.
    fn report_invalid(&mut self, err: KernelError) {
        match err {
            KernelError::SignatureMismatch { .. } => log::error!(
                "[session {}] Rejecting message on {}: {}",
                self.session_id,
                self.channel,
                err
            ),
            _ => log::warn!(
                "[session {}] Invalid message on {}: {}",
                self.session_id,
                self.channel,
                err
            ),
        }

        self.prune_abandoned();
        if self.pending.len() == 1 {
            let sole = self.pending.keys().next().cloned();
            if let Some(reply_tx) = sole.and_then(|msg_id| self.pending.remove(&msg_id)) {
                let _ = reply_tx.send(Err(err));
            }
        }
    }

    /// Forget requests whose callers stopped waiting (e.g. timed out).
    fn prune_abandoned(&mut self) {
        self.pending.retain(|_, tx| !tx.is_closed());
    }

    fn fail_pending(&mut self, err: KernelError) {
        for (_, reply_tx) in self.pending.drain() {
            let _ = reply_tx.send(Err(err.clone()));
        }
    }
}

//
// heartbeat.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use rkshared::kernel_status::HeartbeatStatus;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend};

use crate::close_signal::CloseSignal;

const HB_PAYLOAD: &str = "rkclient-heartbeat";

/// A heartbeat monitor for a kernel connection.
pub struct HeartbeatMonitor {
    session_id: String,
    address: String,
    interval: Duration,
    timeout: Duration,
    status_tx: watch::Sender<HeartbeatStatus>,
    close: CloseSignal,
}

impl HeartbeatMonitor {
    /// Create a new heartbeat monitor.
    ///
    /// # Arguments
    ///
    /// - `session_id`: The ID of the session, for logging.
    /// - `address`: The address of the heartbeat socket.
    /// - `interval`: How long to wait between heartbeats.
    /// - `timeout`: How long to wait for the kernel to echo a heartbeat.
    /// - `status_tx`: Where to publish the kernel's liveness.
    /// - `close`: Stops the monitor when raised.
    pub fn new(
        session_id: String,
        address: String,
        interval: Duration,
        timeout: Duration,
        status_tx: watch::Sender<HeartbeatStatus>,
        close: CloseSignal,
    ) -> Self {
        Self {
            session_id,
            address,
            interval,
            timeout,
            status_tx,
            close,
        }
    }

    /// Monitor the kernel's heartbeat. Returns immediately and runs the monitor
    /// job in the background.
    pub fn monitor(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut hb_socket = match self.connect().await {
            Some(socket) => socket,
            None => return,
        };

        loop {
            if self.close.is_closed() {
                break;
            }

            log::trace!("[session {}] Sending heartbeat to kernel.", self.session_id);
            if let Err(e) = hb_socket.send(HB_PAYLOAD.into()).await {
                log::error!(
                    "[session {}] Failed to send heartbeat: {}",
                    self.session_id,
                    e
                );
                self.set_status(HeartbeatStatus::Offline);
                break;
            }

            let result = tokio::select! {
                _ = self.close.wait() => {
                    log::debug!(
                        "[session {}] Stopping heartbeat monitor (connection closed).",
                        self.session_id
                    );
                    break;
                }
                result = timeout(self.timeout, hb_socket.recv()) => result,
            };

            match result {
                Ok(Ok(response)) => {
                    log::trace!(
                        "[session {}] Got heartbeat response: {:?}",
                        self.session_id,
                        response
                    );
                    if self.set_status(HeartbeatStatus::Alive) {
                        log::info!("[session {}] Kernel heartbeat detected", self.session_id);
                    }
                }
                Ok(Err(e)) => {
                    log::info!(
                        "[session {}] Error receiving heartbeat response: {:?}. Marking kernel offline.",
                        self.session_id,
                        e
                    );
                    self.set_status(HeartbeatStatus::Offline);
                    break;
                }
                Err(_) => {
                    if self.set_status(HeartbeatStatus::Offline) {
                        log::error!(
                            "[session {}] No heartbeat response received after {:?}, marking kernel as offline.",
                            self.session_id,
                            self.timeout
                        );
                    }

                    // A REQ socket can't send again until it has received a
                    // reply, so start over with a fresh one
                    hb_socket.close().await;
                    hb_socket = match self.connect().await {
                        Some(socket) => socket,
                        None => return,
                    };
                    continue;
                }
            }

            tokio::select! {
                _ = self.close.wait() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        hb_socket.close().await;
    }

    /// Connect to the heartbeat socket
    async fn connect(&self) -> Option<ReqSocket> {
        let mut hb_socket = ReqSocket::new();
        match hb_socket.connect(&self.address).await {
            Err(err) => {
                log::error!(
                    "[session {}] Failed to connect to heartbeat socket: {}.",
                    self.session_id,
                    err
                );
                None
            }
            Ok(_) => {
                log::debug!(
                    "[session {}] Connected to heartbeat socket at {}.",
                    self.session_id,
                    self.address
                );
                Some(hb_socket)
            }
        }
    }

    /// Publish a status; returns true if it differs from the previous one.
    fn set_status(&self, status: HeartbeatStatus) -> bool {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        })
    }
}

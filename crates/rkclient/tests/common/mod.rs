//
// mod.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! A scripted in-process kernel for exercising the client over real ZeroMQ
//! sockets.
//!
//! The kernel's behavior for an execute_request depends on the code:
//!
//! - `hang`: never replies
//! - `pair`: held until a second `pair` request arrives, then both are
//!   answered in reverse order
//! - `input`: asks for input on stdin and echoes `Hello, <value>` once the
//!   input_reply arrives
//! - `garbage`: publishes a forged and a truncated message on iopub before
//!   answering normally
//! - `forge_reply`: answers with an execute_reply signed with the wrong key
//! - `truncate_reply`: answers with a frame set too short to decode
//! - `prompt_flood`: sends `STDIN_CAPACITY + 10` input requests on stdin
//!   without waiting for answers, then answers normally
//! - anything else: echoes the code as stdout
//!
//! Every execution publishes busy/idle status around its output.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use rkclient::channel_socket::STDIN_CAPACITY;
use rkclient::close_signal::CloseSignal;
use rkclient::kernel_connection::{ConnectionOptions, KernelConnection};
use rkclient::signature::MessageSigner;
use rkclient::wire_message::{WireMessage, DELIMITER};
use rkclient::wire_message_header::{make_message_id, stamp_header};
use rkshared::connection_info::ConnectionInfo;
use rkshared::jupyter_message::{JupyterChannel, JupyterMessage, JupyterMessageHeader};
use rkshared::port_picker::pick_unused_tcp_ports;
use serde_json::{json, Value};
use tokio::time::timeout;
use zeromq::{
    PubSocket, RepSocket, RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage,
};

pub const TEST_KEY: &str = "a0436f6c-1916-498b-8eb9-e81ab9368e84";
pub const TEST_SCHEME: &str = "hmac-sha256";

pub struct FakeKernel {
    pub info: ConnectionInfo,
    close: CloseSignal,
}

impl FakeKernel {
    /// Start a kernel that signs with the test key.
    pub async fn start() -> Self {
        Self::start_with_key(TEST_KEY, TEST_SCHEME).await
    }

    /// Start a kernel with the given key and scheme; empty strings give an
    /// unsigned kernel.
    pub async fn start_with_key(key: &str, scheme: &str) -> Self {
        let ports =
            pick_unused_tcp_ports(Ipv4Addr::LOCALHOST, 5).expect("Failed to pick kernel ports");
        let info = ConnectionInfo {
            version: None,
            shell_port: ports[0],
            iopub_port: ports[1],
            stdin_port: ports[2],
            control_port: ports[3],
            hb_port: ports[4],
            ip: String::from("127.0.0.1"),
            transport: String::from("tcp"),
            key: key.to_string(),
            signature_scheme: scheme.to_string(),
            kernel_name: Some(String::from("fake")),
        };

        let signer = MessageSigner::from_info(&info).expect("Invalid signing configuration");

        let mut shell = RouterSocket::new();
        shell
            .bind(&info.endpoint(JupyterChannel::Shell))
            .await
            .expect("Failed to bind shell socket");
        let mut control = RouterSocket::new();
        control
            .bind(&info.endpoint(JupyterChannel::Control))
            .await
            .expect("Failed to bind control socket");
        let mut stdin = RouterSocket::new();
        stdin
            .bind(&info.endpoint(JupyterChannel::Stdin))
            .await
            .expect("Failed to bind stdin socket");
        let mut iopub = PubSocket::new();
        iopub
            .bind(&info.endpoint(JupyterChannel::IOPub))
            .await
            .expect("Failed to bind iopub socket");
        let mut heartbeat = RepSocket::new();
        heartbeat
            .bind(&info.endpoint(JupyterChannel::Heartbeat))
            .await
            .expect("Failed to bind heartbeat socket");

        let close = CloseSignal::new();
        let kernel = KernelLoop {
            signer,
            shell,
            control,
            stdin,
            iopub,
            heartbeat,
            close: close.clone(),
            execution_count: 0,
            paired: Vec::new(),
            awaiting_input: None,
        };
        tokio::spawn(kernel.run());

        Self { info, close }
    }

    /// Connect a client and wait until its iopub subscription is live, so
    /// tests don't lose early broadcasts.
    pub async fn connect(&self, options: ConnectionOptions) -> KernelConnection {
        let connection = KernelConnection::connect(self.info.clone(), options)
            .await
            .expect("Failed to connect to fake kernel");

        let mut iopub = connection.subscribe_iopub();
        for _ in 0..50 {
            connection
                .kernel_info()
                .await
                .expect("kernel_info_request failed during warmup");
            if let Ok(Ok(Ok(_))) = timeout(Duration::from_millis(100), iopub.recv()).await {
                return connection;
            }
        }
        panic!("iopub subscription never became live");
    }

    pub fn stop(&self) {
        self.close.close();
    }
}

impl Drop for FakeKernel {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Options for a test client with a short request timeout, so a test that
/// goes wrong fails instead of hanging.
pub fn test_options() -> ConnectionOptions {
    ConnectionOptions {
        username: String::from("tester"),
        request_timeout: Some(Duration::from_secs(10)),
        ..Default::default()
    }
}

/// Build a message from the kernel in response to `parent`.
pub fn reply_to(parent: &JupyterMessage, msg_type: &str, content: Value) -> JupyterMessage {
    let mut header = JupyterMessageHeader::new(msg_type, &make_message_id());
    stamp_header(&mut header, "fake-kernel-session", "kernel");
    JupyterMessage {
        header,
        parent_header: Some(parent.header.clone()),
        metadata: json!({}),
        content,
        buffers: Vec::new(),
    }
}

async fn route(
    socket: &mut RouterSocket,
    signer: &MessageSigner,
    identities: Vec<Vec<u8>>,
    message: JupyterMessage,
) {
    let wire = WireMessage::from_jupyter(&message, signer)
        .expect("Failed to encode kernel message")
        .with_identities(identities);
    socket
        .send(wire.into())
        .await
        .expect("Failed to send kernel message");
}

struct KernelLoop {
    signer: MessageSigner,
    shell: RouterSocket,
    control: RouterSocket,
    stdin: RouterSocket,
    iopub: PubSocket,
    heartbeat: RepSocket,
    close: CloseSignal,
    execution_count: u32,
    paired: Vec<(Vec<Vec<u8>>, JupyterMessage)>,
    awaiting_input: Option<(Vec<Vec<u8>>, JupyterMessage)>,
}

impl KernelLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.close.wait() => break,
                msg = self.shell.recv() => match msg {
                    Ok(msg) => self.on_shell(msg).await,
                    Err(_) => break,
                },
                msg = self.control.recv() => match msg {
                    Ok(msg) => self.on_control(msg).await,
                    Err(_) => break,
                },
                msg = self.stdin.recv() => match msg {
                    Ok(msg) => self.on_stdin(msg).await,
                    Err(_) => break,
                },
                msg = self.heartbeat.recv() => match msg {
                    Ok(msg) => {
                        let _ = self.heartbeat.send(msg).await;
                    }
                    Err(_) => break,
                },
            }
        }
    }

    /// Decode a request; unsigned or forged requests are ignored, as a real
    /// kernel would.
    fn read(&self, msg: ZmqMessage) -> Option<(Vec<Vec<u8>>, JupyterMessage)> {
        let decoded = WireMessage::from_zmq(msg).decode(&self.signer).ok()?;
        if !decoded.is_valid() {
            return None;
        }
        Some((decoded.identities, decoded.message))
    }

    async fn publish(&mut self, message: JupyterMessage) {
        let wire = WireMessage::from_jupyter(&message, &self.signer)
            .expect("Failed to encode iopub message");
        let _ = self.iopub.send(wire.into()).await;
    }

    async fn publish_status(&mut self, parent: &JupyterMessage, state: &str) {
        self.publish(reply_to(parent, "status", json!({ "execution_state": state })))
            .await;
    }

    async fn on_shell(&mut self, msg: ZmqMessage) {
        let Some((identities, request)) = self.read(msg) else {
            return;
        };
        match request.header.msg_type.as_str() {
            "kernel_info_request" => {
                self.publish_status(&request, "busy").await;
                let reply = reply_to(
                    &request,
                    "kernel_info_reply",
                    json!({
                        "status": "ok",
                        "protocol_version": "5.3",
                        "implementation": "fake",
                        "implementation_version": "1.0.0",
                        "language_info": {
                            "name": "echo",
                            "version": "1.0",
                            "mimetype": "text/plain",
                            "file_extension": ".txt"
                        },
                        "banner": "Fake kernel",
                        "help_links": []
                    }),
                );
                route(&mut self.shell, &self.signer, identities, reply).await;
                self.publish_status(&request, "idle").await;
            }
            "execute_request" => self.on_execute(identities, request).await,
            _ => {}
        }
    }

    async fn on_execute(&mut self, identities: Vec<Vec<u8>>, request: JupyterMessage) {
        let code = request.content["code"].as_str().unwrap_or_default().to_string();
        match code.as_str() {
            "hang" => {}
            "pair" => {
                self.paired.push((identities, request));
                if self.paired.len() == 2 {
                    let mut held = std::mem::take(&mut self.paired);
                    while let Some((identities, request)) = held.pop() {
                        self.finish_execute(identities, &request, "pair").await;
                    }
                }
            }
            "input" => {
                self.publish_status(&request, "busy").await;
                let prompt = reply_to(
                    &request,
                    "input_request",
                    json!({ "prompt": "Name: ", "password": false }),
                );
                route(&mut self.stdin, &self.signer, identities.clone(), prompt).await;
                self.awaiting_input = Some((identities, request));
            }
            "garbage" => {
                let forger = MessageSigner::new("not-the-key", TEST_SCHEME)
                    .expect("Failed to create forging signer");
                let forged = reply_to(
                    &request,
                    "stream",
                    json!({ "name": "stdout", "text": "forged" }),
                );
                let forged = WireMessage::from_jupyter(&forged, &forger)
                    .expect("Failed to encode forged message");
                let _ = self.iopub.send(forged.into()).await;

                let mut truncated = ZmqMessage::from(DELIMITER.to_vec());
                truncated.push_back(Bytes::from_static(b"0000"));
                truncated.push_back(Bytes::from_static(b"{}"));
                let _ = self.iopub.send(truncated).await;

                self.finish_execute(identities, &request, "after garbage")
                    .await;
            }
            "forge_reply" => {
                let forger = MessageSigner::new("not-the-key", TEST_SCHEME)
                    .expect("Failed to create forging signer");
                let reply = reply_to(&request, "execute_reply", json!({ "status": "ok" }));
                route(&mut self.shell, &forger, identities, reply).await;
            }
            "truncate_reply" => {
                let mut frames: Vec<Bytes> = identities.into_iter().map(Bytes::from).collect();
                frames.push(Bytes::from_static(DELIMITER));
                frames.push(Bytes::from_static(b"0000"));
                frames.push(Bytes::from_static(b"{}"));
                let truncated =
                    ZmqMessage::try_from(frames).expect("Failed to build truncated reply");
                let _ = self.shell.send(truncated).await;
            }
            "prompt_flood" => {
                for i in 0..STDIN_CAPACITY + 10 {
                    let prompt = reply_to(
                        &request,
                        "input_request",
                        json!({ "prompt": format!("Prompt {}: ", i), "password": false }),
                    );
                    route(&mut self.stdin, &self.signer, identities.clone(), prompt).await;
                }
                self.finish_execute(identities, &request, "flooded").await;
            }
            _ => self.finish_execute(identities, &request, &code).await,
        }
    }

    async fn finish_execute(
        &mut self,
        identities: Vec<Vec<u8>>,
        request: &JupyterMessage,
        output: &str,
    ) {
        self.execution_count += 1;
        self.publish_status(request, "busy").await;
        self.publish(reply_to(
            request,
            "stream",
            json!({ "name": "stdout", "text": output }),
        ))
        .await;

        let reply = reply_to(
            request,
            "execute_reply",
            json!({
                "status": "ok",
                "execution_count": self.execution_count,
                "user_expressions": {}
            }),
        );
        route(&mut self.shell, &self.signer, identities, reply).await;
        self.publish_status(request, "idle").await;
    }

    async fn on_stdin(&mut self, msg: ZmqMessage) {
        let Some((_, reply)) = self.read(msg) else {
            return;
        };
        if reply.header.msg_type != "input_reply" {
            return;
        }
        if let Some((identities, request)) = self.awaiting_input.take() {
            let value = reply.content["value"].as_str().unwrap_or_default();
            let output = format!("Hello, {}", value);
            self.finish_execute(identities, &request, &output).await;
        }
    }

    async fn on_control(&mut self, msg: ZmqMessage) {
        let Some((identities, request)) = self.read(msg) else {
            return;
        };
        let reply = match request.header.msg_type.as_str() {
            "interrupt_request" => {
                reply_to(&request, "interrupt_reply", json!({ "status": "ok" }))
            }
            "shutdown_request" => reply_to(
                &request,
                "shutdown_reply",
                json!({
                    "status": "ok",
                    "restart": request.content["restart"].as_bool().unwrap_or(false)
                }),
            ),
            _ => return,
        };
        route(&mut self.control, &self.signer, identities, reply).await;
    }
}

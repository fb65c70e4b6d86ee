//! A client for the Jupyter kernel wire protocol: builds, signs, and parses
//! messages, and exchanges them with a running kernel over ZeroMQ.

pub mod channel_socket;
pub mod close_signal;
pub mod connection_file;
pub mod error;
pub mod heartbeat;
pub mod iopub;
pub mod jupyter_messages;
pub mod kernel_connection;
pub mod signature;
pub mod wire_message;
pub mod wire_message_header;

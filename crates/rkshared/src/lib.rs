//! Shared Jupyter protocol types for the raw kernel client.

/// Kernel connection parameters
pub mod connection_info;

/// Typed message content
pub mod jupyter_content;

/// Jupyter message envelope and channels
pub mod jupyter_message;

/// kernel_info request/reply content
pub mod kernel_info;

/// Kernel execution and liveness states
pub mod kernel_status;

/// Free port selection
pub mod port_picker;

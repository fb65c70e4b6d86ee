//
// wire_message_header.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use rkshared::jupyter_message::{JupyterMessageHeader, JUPYTER_PROTOCOL_VERSION};

/// Create a random, unique message ID.
pub fn make_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The current time as an ISO 8601 date string, in UTC with milliseconds.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Fill in the empty fields of an outgoing header. Fields the caller already
/// set are left alone.
pub fn stamp_header(header: &mut JupyterMessageHeader, session_id: &str, username: &str) {
    if header.msg_id.is_empty() {
        header.msg_id = make_message_id();
    }
    if header.session.is_empty() {
        header.session = session_id.to_string();
    }
    if header.username.is_empty() {
        header.username = username.to_string();
    }
    if header.date.is_empty() {
        header.date = timestamp();
    }
    if header.version.is_empty() {
        header.version = String::from(JUPYTER_PROTOCOL_VERSION);
    }
}

//
// close_signal.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use event_listener::Event;

/// A one-shot signal shared by a connection and its socket tasks. Once
/// closed, it stays closed.
#[derive(Clone, Default)]
pub struct CloseSignal {
    closed: Arc<AtomicBool>,
    event: Arc<Event>,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns true only for the call that actually closed
    /// it; later calls are no-ops.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.event.notify(usize::MAX);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until the signal is raised.
    pub async fn wait(&self) {
        loop {
            // Register before checking the flag so a close between the two
            // can't be missed
            let listener = self.event.listen();
            if self.is_closed() {
                return;
            }
            listener.await;
        }
    }
}

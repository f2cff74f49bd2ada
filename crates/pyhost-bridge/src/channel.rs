//! Error Channel
//!
//! Holds at most one outstanding failure. A new failure overwrites the old
//! one; reading it consumes it.

use parking_lot::Mutex;
use tracing::debug;

use crate::error::BridgeError;

#[derive(Debug, Default)]
pub struct ErrorChannel {
    slot: Mutex<Option<BridgeError>>,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a failure, replacing whatever was pending.
    pub fn record(&self, err: BridgeError) {
        debug!(kind = %err.kind(), error = %err, "error recorded");
        *self.slot.lock() = Some(err);
    }

    /// Take the pending failure, leaving the channel empty.
    pub fn take(&self) -> Option<BridgeError> {
        self.slot.lock().take()
    }

    pub fn clear(&self) {
        self.slot.lock().take();
    }
}

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::models::error::SinkError;

/// First-error-wins slot shared between a sink and its worker thread.
///
/// `is_set` is a single atomic load so the capture thread can check it on
/// every frame.
#[derive(Debug, Default)]
pub struct ErrorLatch {
    tripped: AtomicBool,
    error: Mutex<Option<SinkError>>,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` unless one is already latched. Returns whether this
    /// call set it.
    pub fn latch(&self, error: SinkError) -> bool {
        let mut slot = self.error.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(error);
        self.tripped.store(true, Ordering::Release);
        true
    }

    pub fn is_set(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    pub fn get(&self) -> Option<SinkError> {
        if !self.is_set() {
            return None;
        }
        self.error.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        let latch = ErrorLatch::new();
        assert!(!latch.is_set());
        assert!(latch.get().is_none());

        assert!(latch.latch(SinkError::Write("disk full".into())));
        assert!(!latch.latch(SinkError::Finalize("later".into())));

        assert!(latch.is_set());
        assert_eq!(latch.get(), Some(SinkError::Write("disk full".into())));
    }
}

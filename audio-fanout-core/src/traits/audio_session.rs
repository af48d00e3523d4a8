use std::sync::Arc;

use crate::models::error::CaptureError;

/// Process-wide audio session configuration (category, routing, focus).
///
/// Owned by the platform; the coordinator only takes a scoped lease on it
/// for the lifetime of a session.
pub trait AudioSessionControl: Send + Sync {
    fn activate(&self) -> Result<(), CaptureError>;

    fn deactivate(&self);
}

/// Scoped hold on the platform audio session. Deactivates on drop.
pub struct AudioSessionLease {
    control: Arc<dyn AudioSessionControl>,
}

impl AudioSessionLease {
    pub fn acquire(control: Arc<dyn AudioSessionControl>) -> Result<Self, CaptureError> {
        control.activate()?;
        Ok(Self { control })
    }
}

impl Drop for AudioSessionLease {
    fn drop(&mut self) {
        self.control.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Default)]
    struct Counting {
        active: AtomicI32,
    }

    impl AudioSessionControl for Counting {
        fn activate(&self) -> Result<(), CaptureError> {
            self.active.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn deactivate(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn lease_deactivates_on_drop() {
        let control = Arc::new(Counting::default());
        let lease = AudioSessionLease::acquire(control.clone()).unwrap();
        assert_eq!(control.active.load(Ordering::SeqCst), 1);
        drop(lease);
        assert_eq!(control.active.load(Ordering::SeqCst), 0);
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::models::audio_models::AudioFrame;

/// Receiving end of a live stream: little-endian PCM16 chunks in arrival order.
pub type LiveStreamReceiver = Receiver<Vec<u8>>;

/// Broadcasts converted frames to one live consumer.
///
/// Backed by a single-slot channel. If the consumer has not taken the
/// previous chunk, the new one is dropped; nothing is buffered beyond one
/// frame. A consumer that hangs up closes the stream.
#[derive(Debug)]
pub struct LiveStream {
    sender: Sender<Vec<u8>>,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl LiveStream {
    pub fn channel() -> (Self, LiveStreamReceiver) {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let stream = Self {
            sender,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };
        (stream, receiver)
    }

    /// Offer a frame. Returns whether the consumer got it.
    pub fn broadcast(&self, frame: &AudioFrame<'_>) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.sender.try_send(frame.to_le_bytes()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                if !self.closed.swap(true, Ordering::Relaxed) {
                    log::info!("live stream consumer disconnected");
                }
                false
            }
        }
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::PcmFormat;

    fn frame(samples: &[i16]) -> AudioFrame<'_> {
        AudioFrame::new(samples, PcmFormat::new(48000, 1), 0)
    }

    #[test]
    fn emits_le_bytes_in_order() {
        let (stream, rx) = LiveStream::channel();
        assert!(stream.broadcast(&frame(&[1, -1])));
        assert_eq!(rx.recv().unwrap(), vec![1, 0, 0xFF, 0xFF]);
        assert!(stream.broadcast(&frame(&[256])));
        assert_eq!(rx.recv().unwrap(), vec![0, 1]);
    }

    #[test]
    fn slow_consumer_sees_drops() {
        let (stream, rx) = LiveStream::channel();
        assert!(stream.broadcast(&frame(&[1])));
        assert!(!stream.broadcast(&frame(&[2])));
        assert!(!stream.broadcast(&frame(&[3])));
        assert_eq!(stream.frames_dropped(), 2);

        // only the frame that fit the slot is delivered
        assert_eq!(rx.try_recv().unwrap(), vec![1, 0]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn hang_up_closes_stream() {
        let (stream, rx) = LiveStream::channel();
        drop(rx);
        assert!(!stream.broadcast(&frame(&[1])));
        assert!(stream.is_closed());
    }
}

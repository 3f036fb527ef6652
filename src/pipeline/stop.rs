use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::shm::SharedRegion;

/// Process-wide shutdown flag stored in the relay's shared region.
///
/// Any attached process may set it; once set it stays set for the lifetime
/// of the region.
#[derive(Clone)]
pub struct StopSignal {
    region: Arc<SharedRegion>,
}

impl StopSignal {
    pub(crate) fn new(region: Arc<SharedRegion>) -> Self {
        Self { region }
    }

    /// Returns true if this call was the one that set the flag.
    pub fn set(&self) -> bool {
        self.region.header().stop.swap(1, Ordering::AcqRel) == 0
    }

    pub fn is_set(&self) -> bool {
        self.region.header().stop.load(Ordering::Acquire) != 0
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::capture::frame::{Frame, FrameMetadata, FrameStatus, PixelFormat};
    use crate::pipeline::relay::{FrameRelay, RelayError};
    use bytes::Bytes;
    use std::time::{Duration, Instant};

    fn relay() -> (tempfile::TempDir, FrameRelay) {
        let dir = tempfile::tempdir().unwrap();
        let relay = FrameRelay::create(&dir.path().join("stop.relay"), 3, 16).unwrap();
        (dir, relay)
    }

    #[test]
    fn set_is_idempotent() {
        let (_dir, relay) = relay();
        let stop = relay.stop_signal();
        assert!(!stop.is_set());
        assert!(stop.set());
        assert!(!stop.set());
        assert!(stop.is_set());
    }

    #[test]
    fn visible_through_an_attached_handle() {
        let (_dir, relay) = relay();
        let other = FrameRelay::attach(relay.path()).unwrap();
        other.stop_signal().set();
        assert!(relay.stop_signal().is_set());
    }

    #[test]
    fn empty_get_after_stop_returns_within_timeout() {
        let (_dir, relay) = relay();
        relay.stop_signal().set();
        let started = Instant::now();
        assert!(matches!(
            relay.get(Duration::from_millis(50)),
            Err(RelayError::QueueEmpty)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn queued_frames_survive_stop() {
        let (_dir, relay) = relay();
        let frame = Frame::new(
            Bytes::from_static(b"abc"),
            FrameMetadata {
                sequence: 42,
                width: 1,
                height: 1,
                stride: 3,
                format: PixelFormat::Rgb24,
                status: FrameStatus::Complete,
                device_timestamp: None,
            },
        );
        relay.try_put(&frame).unwrap();
        relay.stop_signal().set();

        let got = relay.get(Duration::from_millis(10)).unwrap();
        assert_eq!(got.meta.sequence, 42);
        assert_eq!(got.meta.device_timestamp, None);
    }
}

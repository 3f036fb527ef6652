//! Bounded cross-process frame queue over shared memory

use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use crossbeam::utils::Backoff;
use thiserror::Error;
use tracing::info;

use super::shm::{prepare_parent, SharedRegion, SlotHeader};
use super::stop::StopSignal;
use crate::capture::frame::{Frame, FrameMetadata, FrameStatus, PixelFormat};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay is full")]
    QueueFull,
    #[error("no frame arrived in time")]
    QueueEmpty,
    #[error("frame of {len} bytes exceeds the {max}-byte relay slot")]
    FrameTooLarge { len: usize, max: usize },
    #[error("invalid relay region: {0}")]
    Layout(String),
    #[error("relay i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Traffic counters, shared by every process attached to the relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub written: u64,
    pub read: u64,
    pub rejected: u64,
    pub pending: u64,
}

/// FIFO of at most `capacity` frames shared between one producer process
/// and one consumer process.
///
/// Within a process the handle may be shared between threads: puts are
/// serialised against each other, as are gets.
pub struct FrameRelay {
    region: Arc<SharedRegion>,
    put_lock: Mutex<()>,
    get_lock: Mutex<()>,
}

impl FrameRelay {
    pub fn create(path: &Path, capacity: usize, slot_bytes: usize) -> Result<Self, RelayError> {
        prepare_parent(path)?;
        let region = SharedRegion::create(path, capacity, slot_bytes)?;
        info!(
            "Frame relay created at {} (capacity {})",
            path.display(),
            capacity
        );
        Ok(Self::from_region(region))
    }

    pub fn attach(path: &Path) -> Result<Self, RelayError> {
        let region = SharedRegion::attach(path)?;
        info!(
            "Attached to frame relay {} (capacity {})",
            path.display(),
            region.capacity()
        );
        Ok(Self::from_region(region))
    }

    fn from_region(region: SharedRegion) -> Self {
        Self {
            region: Arc::new(region),
            put_lock: Mutex::new(()),
            get_lock: Mutex::new(()),
        }
    }

    /// Stop flag living in the same shared region.
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal::new(self.region.clone())
    }

    pub fn path(&self) -> &Path {
        self.region.path()
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    pub fn slot_bytes(&self) -> usize {
        self.region.slot_bytes()
    }

    /// Frames pending. Observers other than the two endpoints may load a
    /// stale `head` against a fresh `tail`, so the count is clamped.
    pub fn len(&self) -> usize {
        let header = self.region.header();
        let head = header.head.load(Ordering::Acquire);
        let tail = header.tail.load(Ordering::Acquire);
        (tail.saturating_sub(head) as usize).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RelayStats {
        let header = self.region.header();
        RelayStats {
            written: header.written.load(Ordering::Relaxed),
            read: header.read.load(Ordering::Relaxed),
            rejected: header.rejected.load(Ordering::Relaxed),
            pending: self.len() as u64,
        }
    }

    /// Enqueue a copy of `frame`, waiting up to `timeout` for a free slot.
    pub fn put(&self, frame: &Frame, timeout: Duration) -> Result<(), RelayError> {
        let max = self.region.slot_bytes();
        if frame.data.len() > max {
            return Err(RelayError::FrameTooLarge {
                len: frame.data.len(),
                max,
            });
        }

        let _guard = lock(&self.put_lock);
        let header = self.region.header();
        let capacity = self.region.capacity() as u64;
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();

        loop {
            let tail = header.tail.load(Ordering::Relaxed);
            let head = header.head.load(Ordering::Acquire);

            if tail - head < capacity {
                // SAFETY: the consumer never reads at or past `tail`, and
                // `tail - head < capacity` means this slot was released.
                unsafe {
                    self.region
                        .write_slot(tail, slot_header(frame), &frame.data);
                }
                header.tail.store(tail + 1, Ordering::Release);
                header.written.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }

            if !wait(&backoff, deadline) {
                header.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(RelayError::QueueFull);
            }
        }
    }

    /// Enqueue without waiting.
    pub fn try_put(&self, frame: &Frame) -> Result<(), RelayError> {
        self.put(frame, Duration::ZERO)
    }

    /// Dequeue the oldest pending frame, waiting up to `timeout` for one.
    pub fn get(&self, timeout: Duration) -> Result<Frame, RelayError> {
        let _guard = lock(&self.get_lock);
        let header = self.region.header();
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();

        loop {
            let head = header.head.load(Ordering::Relaxed);
            let tail = header.tail.load(Ordering::Acquire);

            if head < tail {
                // SAFETY: `head < tail` means the producer published this
                // slot and will not touch it until `head` moves past it.
                let frame = unsafe {
                    let (meta, payload) = self.region.read_slot(head)?;
                    frame_from_slot(meta, payload)
                };
                header.head.store(head + 1, Ordering::Release);
                header.read.fetch_add(1, Ordering::Relaxed);
                return Ok(frame);
            }

            if !wait(&backoff, deadline) {
                return Err(RelayError::QueueEmpty);
            }
        }
    }
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Spin briefly, then sleep in short steps. Returns false once `deadline` passed.
fn wait(backoff: &Backoff, deadline: Instant) -> bool {
    let now = Instant::now();
    if now >= deadline {
        return false;
    }
    if backoff.is_completed() {
        std::thread::sleep((deadline - now).min(Duration::from_millis(1)));
    } else {
        backoff.snooze();
    }
    true
}

fn nanos_since_epoch(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn slot_header(frame: &Frame) -> SlotHeader {
    let meta = &frame.meta;
    SlotHeader {
        sequence: meta.sequence,
        captured_at_ns: nanos_since_epoch(frame.captured_at),
        device_ts_ns: meta
            .device_timestamp
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(u64::MAX),
        len: frame.data.len() as u64,
        width: meta.width,
        height: meta.height,
        stride: meta.stride,
        format: meta.format as u32,
        status: meta.status as u32,
        _pad: 0,
    }
}

fn frame_from_slot(slot: SlotHeader, payload: &[u8]) -> Frame {
    Frame {
        data: Bytes::copy_from_slice(payload),
        meta: Arc::new(FrameMetadata {
            sequence: slot.sequence,
            width: slot.width,
            height: slot.height,
            stride: slot.stride,
            // Both ends are built from the same crate, so codes are known
            format: PixelFormat::from_code(slot.format).unwrap_or(PixelFormat::Rgb24),
            status: FrameStatus::from_code(slot.status),
            device_timestamp: (slot.device_ts_ns != u64::MAX)
                .then(|| Duration::from_nanos(slot.device_ts_ns)),
        }),
        captured_at: UNIX_EPOCH + Duration::from_nanos(slot.captured_at_ns),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::thread;

    fn frame(sequence: u64, fill: u8) -> Frame {
        Frame::new(
            Bytes::from(vec![fill; 12]),
            FrameMetadata {
                sequence,
                width: 2,
                height: 2,
                stride: 6,
                format: PixelFormat::Bgr24,
                status: FrameStatus::Complete,
                device_timestamp: Some(Duration::from_micros(sequence * 10)),
            },
        )
    }

    fn relay(capacity: usize) -> (tempfile::TempDir, FrameRelay) {
        let dir = tempfile::tempdir().unwrap();
        let relay = FrameRelay::create(&dir.path().join("test.relay"), capacity, 64).unwrap();
        (dir, relay)
    }

    #[test]
    fn frames_come_out_in_order_with_metadata() {
        let (_dir, relay) = relay(3);
        for i in 0..3 {
            relay.try_put(&frame(i, i as u8)).unwrap();
        }
        for i in 0..3 {
            let got = relay.get(Duration::from_millis(10)).unwrap();
            assert_eq!(got.meta.sequence, i);
            assert_eq!(got.meta.format, PixelFormat::Bgr24);
            assert_eq!(got.meta.device_timestamp, Some(Duration::from_micros(i * 10)));
            assert_eq!(&got.data[..], &[i as u8; 12]);
        }
        assert!(relay.is_empty());
    }

    #[test]
    fn full_relay_rejects_after_timeout() {
        let (_dir, relay) = relay(2);
        relay.try_put(&frame(0, 0)).unwrap();
        relay.try_put(&frame(1, 1)).unwrap();

        let started = Instant::now();
        let err = relay.put(&frame(2, 2), Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, RelayError::QueueFull));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(relay.len(), 2);
        assert_eq!(relay.stats().rejected, 1);
    }

    #[test]
    fn empty_get_times_out_promptly() {
        let (_dir, relay) = relay(3);
        let started = Instant::now();
        assert!(matches!(
            relay.get(Duration::from_millis(20)),
            Err(RelayError::QueueEmpty)
        ));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(20));
        assert!(waited < Duration::from_secs(1));
    }

    #[test]
    fn oversized_frame_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let relay = FrameRelay::create(&dir.path().join("small.relay"), 1, 4).unwrap();
        assert!(matches!(
            relay.try_put(&frame(0, 0)),
            Err(RelayError::FrameTooLarge { len: 12, max: 4 })
        ));
    }

    #[test]
    fn len_is_clamped_for_outside_observers() {
        let (_dir, relay) = relay(3);
        relay.try_put(&frame(1, 1)).unwrap();
        // an observer pairing a stale head with a fresh tail
        relay.region.header().tail.fetch_add(4, Ordering::AcqRel);
        assert_eq!(relay.len(), 3);
    }

    #[test]
    fn attached_handle_shares_the_queue() {
        let (_dir, producer) = relay(3);
        let consumer = FrameRelay::attach(producer.path()).unwrap();
        producer.try_put(&frame(7, 7)).unwrap();
        assert_eq!(consumer.len(), 1);
        assert_eq!(consumer.get(Duration::ZERO).unwrap().meta.sequence, 7);
        assert!(producer.is_empty());
    }

    #[test]
    fn capacity_is_never_exceeded_under_concurrency() {
        for capacity in 1..=4 {
            let (_dir, relay) = relay(capacity);
            let relay = Arc::new(relay);
            let max_seen = Arc::new(AtomicUsize::new(0));

            let producer = {
                let relay = relay.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        relay.put(&frame(i, 0), Duration::from_secs(5)).unwrap();
                        max_seen.fetch_max(relay.len(), AtomicOrdering::SeqCst);
                    }
                })
            };

            let mut expected = 0;
            while expected < 200 {
                let len = relay.len();
                max_seen.fetch_max(len, AtomicOrdering::SeqCst);
                if let Ok(f) = relay.get(Duration::from_millis(100)) {
                    assert_eq!(f.meta.sequence, expected);
                    expected += 1;
                }
            }
            producer.join().unwrap();
            assert!(max_seen.load(AtomicOrdering::SeqCst) <= capacity);
        }
    }

    #[test]
    fn creator_removes_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.relay");
        {
            let relay = FrameRelay::create(&path, 1, 8).unwrap();
            assert!(relay.path().exists());
        }
        assert!(!path.exists());
    }
}

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use relaycam::capture::{Frame, FrameMetadata, FrameStatus, PixelFormat};
use relaycam::pipeline::{FrameRelay, RelayError};

fn frame(sequence: u64) -> Frame {
    Frame::new(
        Bytes::from(sequence.to_le_bytes().to_vec()),
        FrameMetadata {
            sequence,
            width: 1,
            height: 1,
            stride: 8,
            format: PixelFormat::Mono8,
            status: FrameStatus::Complete,
            device_timestamp: None,
        },
    )
}

/// Producer with a blocking policy stalls on F4 until F1 is consumed.
#[test]
fn test_blocking_producer_waits_for_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let relay = Arc::new(FrameRelay::create(&dir.path().join("blocking.relay"), 3, 64).unwrap());

    let producer = {
        let relay = relay.clone();
        thread::spawn(move || {
            let mut put_at = Vec::new();
            for seq in 1..=5 {
                relay.put(&frame(seq), Duration::from_secs(10)).unwrap();
                put_at.push(Instant::now());
            }
            put_at
        })
    };

    // F1..F3 fit, F4 must block
    while relay.len() < 3 {
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(100));
    assert_eq!(relay.len(), 3);
    assert_eq!(relay.stats().written, 3);

    let consumer = FrameRelay::attach(relay.path()).unwrap();
    let released_at = Instant::now();
    let first = consumer.get(Duration::from_secs(1)).unwrap();
    assert_eq!(first.meta.sequence, 1);

    let mut rest = Vec::new();
    for _ in 0..4 {
        rest.push(consumer.get(Duration::from_secs(5)).unwrap().meta.sequence);
    }
    assert_eq!(rest, vec![2, 3, 4, 5]);

    let put_at = producer.join().unwrap();
    assert!(put_at[3] >= released_at, "F4 was enqueued before F1 left");
}

#[test]
fn test_full_relay_rejects_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let relay = FrameRelay::create(&dir.path().join("full.relay"), 3, 64).unwrap();
    for seq in 1..=3 {
        relay.try_put(&frame(seq)).unwrap();
    }

    let started = Instant::now();
    let result = relay.put(&frame(4), Duration::from_millis(50));
    assert!(matches!(result, Err(RelayError::QueueFull)));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(relay.stats().rejected, 1);
}

#[test]
fn test_capacity_never_exceeded_under_contention() {
    for capacity in 1..=4 {
        let dir = tempfile::tempdir().unwrap();
        let relay = Arc::new(
            FrameRelay::create(&dir.path().join("contention.relay"), capacity, 64).unwrap(),
        );
        let consumer = FrameRelay::attach(relay.path()).unwrap();

        let producer = {
            let relay = relay.clone();
            thread::spawn(move || {
                for seq in 0..200 {
                    relay.put(&frame(seq), Duration::from_secs(5)).unwrap();
                }
            })
        };

        let mut expected = 0;
        while expected < 200 {
            assert!(consumer.len() <= capacity);
            if let Ok(frame) = consumer.get(Duration::from_millis(100)) {
                assert_eq!(frame.meta.sequence, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
        assert!(consumer.is_empty());
    }
}

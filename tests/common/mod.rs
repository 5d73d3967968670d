//! Common test utilities and helpers

#![allow(dead_code)] // Not every test file uses every helper

use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use framepipe::capture::{FrameProperties, PixelFormat};
use framepipe::pipeline::FnWorker;
use framepipe::{ArrayView, Frame, Worker};

/// Generous upper bound for anything crossing threads
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// 2x2 RGB frame whose pixels all equal the low byte of `sequence`
pub fn test_frame(sequence: u64) -> Frame {
    let props = FrameProperties {
        sequence,
        start_time: Some(Duration::from_millis(sequence * 33)),
        ..Default::default()
    };
    Frame::new(
        Bytes::from(vec![sequence as u8; 2 * 2 * 3]),
        2,
        2,
        PixelFormat::Rgb24,
        props,
    )
}

/// Worker that sleeps for `latency` per item
pub fn slow_worker(latency: Duration) -> impl Worker {
    FnWorker::new("slow", move |array: ArrayView| {
        thread::sleep(latency);
        Ok(array)
    })
}

/// Worker that reports each item it starts and blocks until released
pub fn gated_worker() -> (impl Worker, mpsc::Sender<()>, mpsc::Receiver<u64>) {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<u64>();
    let release_rx = Mutex::new(release_rx);
    let worker = FnWorker::new("gated", move |array: ArrayView| {
        let _ = started_tx.send(array.sequence());
        let _ = release_rx.lock().unwrap().recv();
        Ok(array)
    });
    (worker, release_tx, started_rx)
}

/// Poll `cond` until it holds or the timeout expires
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

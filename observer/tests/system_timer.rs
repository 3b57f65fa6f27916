//! Delay and buffer policies against the wall-clock timer service.

use observer::prelude::*;
use observer::testing::Recorder;
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn wait_for(recorder: &Recorder, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while recorder.count() < count && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_delay_on_runtime() {
    let observer = Observer::new();
    let recorder = Recorder::new();

    let started = Instant::now();
    observer.delay(50, "saved", recorder.handler(), None, ());
    observer.broadcast("saved", args![1]);
    recorder.assert_not_called();

    wait_for(&recorder, 1).await;
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(recorder.calls(), vec![args![observer.clone(), 1]]);
}

#[tokio::test]
async fn test_destroy_cancels_runtime_timers() {
    let timer = Arc::new(SystemTimer::new());
    let observer = Observer::builder().with_timer(timer.clone()).build();
    let recorder = Recorder::new();

    observer.delay(30, "saved", recorder.handler(), None, ());
    observer.broadcast("saved", Vec::new());
    assert_eq!(timer.pending(), 1);

    assert!(observer.destroy());
    assert_eq!(timer.pending(), 0);

    tokio::time::sleep(Duration::from_millis(80)).await;
    recorder.assert_not_called();
}

#[test]
fn test_buffer_without_runtime() {
    let observer = Observer::new();
    let recorder = Recorder::new();

    observer.buffer(20, "tick", recorder.handler(), None, ());
    observer.broadcast("tick", Vec::new());
    observer.broadcast("tick", Vec::new());
    recorder.assert_called_times(1);

    std::thread::sleep(Duration::from_millis(100));
    observer.broadcast("tick", Vec::new());
    recorder.assert_called_times(2);
}

#[test]
fn test_destroy_releases_queued_delays_without_runtime() {
    let timer = Arc::new(SystemTimer::new());
    let observer = Observer::builder().with_timer(timer.clone()).build();
    let recorder = Recorder::new();

    observer.delay(5_000, "saved", recorder.handler(), None, ());
    for n in 0..200 {
        observer.broadcast("saved", args![n]);
    }
    assert_eq!(timer.pending(), 1);

    let listener = observer.get_listeners("saved").remove(0);
    assert!(observer.destroy());
    assert_eq!(timer.pending(), 0);
    assert_eq!(Arc::strong_count(&listener), 1);
    recorder.assert_not_called();
}

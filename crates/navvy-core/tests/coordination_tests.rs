//! Integration tests for the cooperative primitives working together.
//!
//! Tests verify:
//! - Labeled tasks, triggers and `wrap` round-trip through the public API
//! - Semaphore permits bound real task concurrency in FIFO order
//! - Pull streams shape data lazily; list streams connect producers to
//!   consumers, closing listeners included
//! - Timer utilities compose with each other under paused time

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use navvy_core::runtime::{self, TaskError};
use navvy_core::stream::{AsyncStream, ListStream, Stream};
use navvy_core::sync::Semaphore;
use navvy_core::time::{debounce_trailing, set_interval};
use rstest::rstest;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Runtime
// ============================================================================

#[tokio::test]
async fn labeled_task_round_trip() {
    init_tracing();
    let handle = runtime::spawn("adder", async { 2 + 2 });
    assert_eq!(handle.label(), "adder");
    assert_eq!(handle.join().await.unwrap(), 4);
}

#[tokio::test]
async fn panic_is_captured_not_propagated() {
    init_tracing();
    let handle = runtime::spawn("doomed", async { panic!("kaboom") });
    let err = handle.join().await.unwrap_err();
    assert!(matches!(err, TaskError::Panicked { .. }));
    // The runtime is still healthy afterwards.
    let next = runtime::spawn("survivor", async { "ok" });
    assert_eq!(next.join().await.unwrap(), "ok");
}

#[tokio::test]
async fn wrap_bridges_callback_into_future() {
    let value = runtime::wrap(|trigger| {
        runtime::spawn("firer", async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.fire(41);
        });
    })
    .await
    .unwrap();
    assert_eq!(value, 41);
}

// ============================================================================
// Semaphore Bounds Concurrency
// ============================================================================

#[tokio::test]
async fn permits_bound_worker_concurrency() {
    init_tracing();
    let semaphore = Semaphore::new(2);
    let gauge = Arc::new(Mutex::new((0u32, 0u32)));

    let mut workers = Vec::new();
    for index in 0..6 {
        let semaphore = semaphore.clone();
        let gauge = gauge.clone();
        workers.push(runtime::spawn(format!("worker-{index}"), async move {
            let permit = semaphore.acquire().await;
            {
                let mut g = gauge.lock().unwrap();
                g.0 += 1;
                g.1 = g.1.max(g.0);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            gauge.lock().unwrap().0 -= 1;
            permit.release();
        }));
    }
    for worker in workers {
        worker.join().await.unwrap();
    }

    let (live, peak) = *gauge.lock().unwrap();
    assert_eq!(live, 0);
    assert_eq!(peak, 2, "exactly two workers should ever hold permits");
}

// ============================================================================
// Stream Shaping
// ============================================================================

fn sliced(start: Option<usize>, end: Option<usize>) -> Vec<u32> {
    let stream = Stream::from_iter(0u32..10);
    let sliced = match (start, end) {
        (Some(s), Some(e)) => stream.slice(s..e),
        (Some(s), None) => stream.slice(s..),
        (None, Some(e)) => stream.slice(..e),
        (None, None) => stream.slice(..),
    };
    sliced.collect().unwrap()
}

#[rstest]
#[case(Some(2), Some(5), vec![2, 3, 4])]
#[case(None, Some(3), vec![0, 1, 2])]
#[case(Some(7), None, vec![7, 8, 9])]
#[case(None, None, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9])]
fn slice_matches_range_semantics(
    #[case] start: Option<usize>,
    #[case] end: Option<usize>,
    #[case] expected: Vec<u32>,
) {
    assert_eq!(sliced(start, end), expected);
}

#[tokio::test]
async fn list_stream_pipeline_with_closing_listener() {
    init_tracing();
    let stream = ListStream::new();
    stream.on_closing(|staged: &mut Vec<u32>| staged.push(99));

    let producer = {
        let stream = stream.clone();
        runtime::spawn("producer", async move {
            for n in 0..5u32 {
                stream.push(n).await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stream.close().await;
        })
    };

    let mut seen = Vec::new();
    while let Some(n) = stream.next().await {
        seen.push(n);
    }
    producer.join().await.unwrap();
    assert_eq!(seen, vec![0, 1, 2, 3, 4, 99]);
}

#[tokio::test]
async fn list_stream_through_async_combinators() {
    let stream = ListStream::new();
    stream.push_all([1u32, 2, 3, 4, 5, 6]).await;
    stream.close().await;

    let evens = AsyncStream::new(stream)
        .filter(|n| n % 2 == 0)
        .collect()
        .await
        .unwrap();
    assert_eq!(evens, vec![2, 4, 6]);
}

// ============================================================================
// Timers Compose (paused time)
// ============================================================================

#[tokio::test(start_paused = true)]
async fn interval_ticks_settle_through_debounce() {
    let start = tokio::time::Instant::now();
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = fired.clone();
    let debounce = debounce_trailing(Duration::from_millis(35), false, move |tick: u32| {
        let at = tokio::time::Instant::now().duration_since(start).as_millis() as u64;
        sink.lock().unwrap().push((at, tick));
    });

    // Five interval ticks at 10ms spacing hammer the debounce; only the
    // settle after the last tick fires it.
    let mut tick = 0u32;
    let caller = debounce.clone();
    set_interval(
        move || {
            tick += 1;
            caller.call(tick);
            if tick == 5 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        },
        Duration::from_millis(10),
    );

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(*fired.lock().unwrap(), vec![(85, 5)]);
    debounce.close();
}

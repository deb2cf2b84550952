//! Batch Execution Tests
//!
//! Concurrency limiting, outcome aggregation, progress tracking and
//! executor reuse.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use email_intelligence::batch::{BatchExecutor, BatchOutcome};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};

/// Tracks how many handler bodies are inside at once
#[derive(Default)]
struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
    entries: AtomicUsize,
}

impl ConcurrencyTracker {
    fn enter(&self) {
        self.entries.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

async fn tracked_batch(
    executor: &BatchExecutor,
    tracker: Arc<ConcurrencyTracker>,
    items: Vec<u64>,
) -> BatchOutcome {
    executor
        .run_batch(items, move |i: u64| {
            let tracker = Arc::clone(&tracker);
            async move {
                tracker.enter();
                tokio::time::sleep(Duration::from_millis(20)).await;
                tracker.exit();
                Ok::<_, String>(json!({ "value": i }))
            }
        })
        .await
}

#[tokio::test]
async fn test_basic_batch_execution() {
    email_intelligence::telemetry::init_test_tracing();
    let executor = BatchExecutor::new(2).expect("capacity is valid");

    let outcome = executor
        .run_batch((0..5).collect(), |i: i32| async move {
            Ok::<_, String>(json!({ "value": i }))
        })
        .await;

    assert_eq!(outcome.total, 5);
    assert_eq!(outcome.successful, 5);
    assert_eq!(outcome.failed, 0);
    assert!(outcome.errors.is_empty());
    assert!(outcome.is_complete_success());

    let mut values: Vec<i64> = outcome
        .values()
        .map(|v| v["value"].as_i64().expect("value is an integer"))
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_batch_concurrency_limiting() {
    let executor = BatchExecutor::new(2).unwrap();
    let tracker = Arc::new(ConcurrencyTracker::default());

    let outcome = tracked_batch(&executor, Arc::clone(&tracker), (0..10).collect()).await;

    assert_eq!(outcome.successful, 10);
    assert!(tracker.peak() <= 2, "peak concurrency {} exceeded 2", tracker.peak());
    assert!(tracker.peak() >= 1);
    assert_eq!(executor.available_slots(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_limit_holds_on_multi_thread_runtime() {
    let executor = BatchExecutor::new(3).unwrap();
    let tracker = Arc::new(ConcurrencyTracker::default());

    let outcome = tracked_batch(&executor, Arc::clone(&tracker), (0..24).collect()).await;

    assert_eq!(outcome.successful, 24);
    assert!(tracker.peak() <= 3, "peak concurrency {} exceeded 3", tracker.peak());
}

#[tokio::test]
async fn test_units_are_launched_together() {
    // With capacity equal to the item count every unit should overlap
    let executor = BatchExecutor::new(4).unwrap();
    let tracker = Arc::new(ConcurrencyTracker::default());

    tracked_batch(&executor, Arc::clone(&tracker), (0..4).collect()).await;

    assert_eq!(tracker.peak(), 4);
}

#[tokio::test]
async fn test_empty_batch() {
    let executor = BatchExecutor::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let outcome = executor
        .run_batch(Vec::<Value>::new(), move |_item| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, String>(json!({})) }
        })
        .await;

    assert_eq!(outcome, BatchOutcome::new(0));
    assert_eq!(outcome.total, 0);
    assert_eq!(outcome.successful, 0);
    assert_eq!(outcome.failed, 0);
    assert!(outcome.results.is_empty());
    assert!(outcome.errors.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_batch_progress_tracking() {
    let progress_updates = Arc::new(Mutex::new(Vec::new()));
    let progress_clone = Arc::clone(&progress_updates);

    let executor = BatchExecutor::new(2)
        .unwrap()
        .with_progress_callback(move |settled, total| {
            progress_clone.lock().unwrap().push((settled, total));
        });

    executor
        .run_batch((0..5).collect(), |i: u8| async move {
            if i % 2 == 0 {
                Ok(json!({ "value": i }))
            } else {
                Err("odd")
            }
        })
        .await;

    let updates = progress_updates.lock().unwrap();
    assert_eq!(*updates, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
}

#[tokio::test]
async fn test_results_follow_settlement_order_with_input_index() {
    let executor = BatchExecutor::new(3).unwrap();

    let outcome = executor
        .run_batch(vec![120_u64, 60, 0], |delay_ms| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok::<_, String>(json!({ "delay_ms": delay_ms }))
        })
        .await;

    assert_eq!(outcome.successful, 3);
    assert_eq!(outcome.results[0].index, 2, "fastest item settles first");

    let ordered: Vec<&Value> = outcome.results_in_input_order();
    assert_eq!(
        ordered,
        vec![
            &json!({ "delay_ms": 120 }),
            &json!({ "delay_ms": 60 }),
            &json!({ "delay_ms": 0 })
        ]
    );
}

#[tokio::test]
async fn test_concurrent_batches_share_one_gate() {
    let executor = BatchExecutor::new(2).unwrap();
    let tracker = Arc::new(ConcurrencyTracker::default());

    let (first, second) = tokio::join!(
        tracked_batch(&executor, Arc::clone(&tracker), (0..6).collect()),
        tracked_batch(&executor, Arc::clone(&tracker), (6..12).collect()),
    );

    assert_eq!(first.successful, 6);
    assert_eq!(second.successful, 6);
    assert!(tracker.peak() <= 2, "peak concurrency {} exceeded 2", tracker.peak());
    assert_eq!(tracker.entries.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn test_executor_is_reusable() {
    let executor = BatchExecutor::new(1).unwrap();

    for round in 0..3 {
        let outcome = executor
            .run_batch(vec![round; 4], |n: i32| async move {
                Ok::<_, String>(json!({ "round": n }))
            })
            .await;
        assert_eq!(outcome.successful, 4);
    }
    assert_eq!(executor.available_slots(), 1);
}

#[tokio::test]
async fn test_outcome_serializes_for_consumers() {
    let executor = BatchExecutor::new(1).unwrap();
    let outcome = executor
        .run_batch(vec![7], |n: i32| async move { Ok::<_, String>(json!({ "value": n })) })
        .await;

    let wire = serde_json::to_value(&outcome).unwrap();
    assert_eq!(wire["total"], json!(1));
    assert_eq!(wire["successful"], json!(1));
    assert_eq!(wire["results"][0]["index"], json!(0));
    assert_eq!(wire["results"][0]["value"], json!({ "value": 7 }));
    assert_eq!(wire["errors"], json!([]));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_total_matches_input_length(
        plan in proptest::collection::vec(0u8..3, 0..24),
        capacity in 1usize..6,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let expected_len = plan.len();
        let expected_ok = plan.iter().filter(|p| **p == 0).count();
        let expected_err = plan.iter().filter(|p| **p == 1).count();

        let outcome = runtime.block_on(async move {
            let executor = BatchExecutor::new(capacity).unwrap();
            executor
                .run_batch(plan, |p: u8| async move {
                    match p {
                        0 => Ok(json!({ "ok": true })),
                        1 => Err("raised"),
                        _ => Ok(json!({ "error": "semantic" })),
                    }
                })
                .await
        });

        prop_assert_eq!(outcome.total, expected_len);
        prop_assert_eq!(outcome.successful, expected_ok);
        prop_assert_eq!(outcome.failed, expected_err);
        prop_assert_eq!(outcome.successful + outcome.failed + outcome.rejected, outcome.total);
        prop_assert!(outcome.successful + outcome.failed <= outcome.total);
    }
}

//! Integration tests for event fan-out
//!
//! Timing-sensitive tests run on tokio's paused clock, so backoff and
//! deadlines advance virtual time only.

use async_trait::async_trait;
use distribution_events::{
    DeliveryError, DistributionEvent, EventPublisher, EventSubscriber, FailureReason,
};
use resilience::{Deadline, RetryPolicy, Sleeper};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_secs(1),
    }
}

fn event() -> DistributionEvent {
    DistributionEvent::push(
        "img1",
        1,
        "checksum-1",
        BTreeSet::from(["US".to_string()]),
        "s3://origin/img1",
        "integration-test",
    )
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

enum Behavior {
    Succeed,
    FailTransient,
    Reject,
    Hang(Duration),
}

struct ScriptedSubscriber {
    behavior: Behavior,
    calls: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedSubscriber {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSubscriber for ScriptedSubscriber {
    async fn on_event(&self, _event: &DistributionEvent) -> distribution_events::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());

        match &self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::FailTransient => Err(DeliveryError::Transient("edge unreachable".into())),
            Behavior::Reject => Err(DeliveryError::Rejected("checksum mismatch".into())),
            Behavior::Hang(d) => {
                tokio::time::sleep(*d).await;
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

#[tokio::test]
async fn test_permanently_failing_target_attempted_exactly_max_attempts() {
    init_tracing();
    let sleeper = Arc::new(RecordingSleeper::default());
    let publisher = EventPublisher::new(policy()).with_sleeper(sleeper.clone());
    let failing = ScriptedSubscriber::new(Behavior::FailTransient);
    publisher.subscribe("edge-a", &failing);

    let report = publisher.publish(event(), &ids(&["edge-a"])).await;

    assert_eq!(failing.calls(), 3);
    assert_eq!(
        report.failed.get("edge-a"),
        Some(&FailureReason::RetriesExhausted {
            attempts: 3,
            last_error: "Transient delivery failure: edge unreachable".to_string(),
        })
    );

    let delays = sleeper.delays.lock().unwrap().clone();
    assert_eq!(delays.len(), 2);
    assert!(delays.windows(2).all(|w| w[0] < w[1] || w[1] == policy().max_delay));
}

#[tokio::test]
async fn test_rejected_delivery_is_not_retried() {
    let publisher = EventPublisher::new(policy());
    let rejecting = ScriptedSubscriber::new(Behavior::Reject);
    publisher.subscribe("edge-a", &rejecting);

    let report = publisher.publish(event(), &ids(&["edge-a"])).await;

    assert_eq!(rejecting.calls(), 1);
    assert_eq!(report.failed["edge-a"].as_str(), "rejected");
}

#[tokio::test(start_paused = true)]
async fn test_failing_target_does_not_delay_healthy_target() {
    let publisher = EventPublisher::new(policy());
    let failing = ScriptedSubscriber::new(Behavior::FailTransient);
    let healthy = ScriptedSubscriber::new(Behavior::Succeed);
    publisher.subscribe("failing", &failing);
    publisher.subscribe("healthy", &healthy);

    let start = Instant::now();
    let report = publisher
        .publish(event(), &ids(&["failing", "healthy"]))
        .await;

    assert_eq!(report.delivered, BTreeSet::from(["healthy".to_string()]));
    assert_eq!(report.failed_node_ids(), BTreeSet::from(["failing".to_string()]));

    // Healthy edge was served immediately, not after the failing edge's backoff
    let healthy_at = healthy.call_times.lock().unwrap()[0];
    assert!(healthy_at.duration_since(start) < Duration::from_millis(1));

    // Failing edge attempts are strictly sequential: 0ms, 100ms, 300ms
    let failing_times = failing.call_times.lock().unwrap().clone();
    assert_eq!(failing_times.len(), 3);
    let first_gap = failing_times[1] - failing_times[0];
    let second_gap = failing_times[2] - failing_times[1];
    assert!(first_gap >= Duration::from_millis(100) && first_gap < Duration::from_millis(110));
    assert!(second_gap >= Duration::from_millis(200) && second_gap < Duration::from_millis(210));
}

#[tokio::test(start_paused = true)]
async fn test_publish_latency_bounded_by_slowest_target() {
    let publisher = EventPublisher::new(policy());
    let a = ScriptedSubscriber::new(Behavior::FailTransient);
    let b = ScriptedSubscriber::new(Behavior::FailTransient);
    publisher.subscribe("a", &a);
    publisher.subscribe("b", &b);

    let start = Instant::now();
    let report = publisher.publish(event(), &ids(&["a", "b"])).await;

    assert_eq!(report.failed.len(), 2);
    // One retry sequence is 100ms + 200ms; both ran side by side
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_abandons_in_flight_deliveries() {
    let publisher = EventPublisher::new(policy());
    let hanging = ScriptedSubscriber::new(Behavior::Hang(Duration::from_secs(30)));
    let healthy = ScriptedSubscriber::new(Behavior::Succeed);
    publisher.subscribe("hanging", &hanging);
    publisher.subscribe("healthy", &healthy);

    let start = Instant::now();
    let report = publisher
        .publish_until(
            event(),
            &ids(&["hanging", "healthy"]),
            Some(Deadline::after(Duration::from_secs(1))),
        )
        .await;

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
    assert!(report.delivered.contains("healthy"));
    assert_eq!(report.failed.get("hanging"), Some(&FailureReason::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn test_default_deadline_applies_to_publish() {
    let publisher = EventPublisher::new(policy()).with_deadline(Duration::from_millis(250));
    let failing = ScriptedSubscriber::new(Behavior::FailTransient);
    publisher.subscribe("failing", &failing);

    let report = publisher.publish(event(), &ids(&["failing"])).await;

    // Third attempt would start at 300ms, past the deadline
    assert_eq!(failing.calls(), 2);
    assert_eq!(report.failed.get("failing"), Some(&FailureReason::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn test_slow_delivery_does_not_block_subscribe() {
    let publisher = Arc::new(EventPublisher::new(policy()));
    let slow = ScriptedSubscriber::new(Behavior::Hang(Duration::from_secs(10)));
    publisher.subscribe("slow", &slow);

    let publishing = {
        let publisher = Arc::clone(&publisher);
        tokio::spawn(async move { publisher.publish(event(), &ids(&["slow"])).await })
    };

    // Let the delivery start and park on its sleep
    while slow.calls() == 0 {
        tokio::task::yield_now().await;
    }

    let late = ScriptedSubscriber::new(Behavior::Succeed);
    publisher.subscribe("late", &late);
    assert!(publisher.is_subscribed("late"));
    assert!(!publishing.is_finished());

    let report = publishing.await.unwrap();
    assert!(report.delivered.contains("slow"));
}

#[tokio::test]
async fn test_dropped_subscriber_reported_without_attempt() {
    let publisher = EventPublisher::new(policy());
    let edge = ScriptedSubscriber::new(Behavior::Succeed);
    publisher.subscribe("edge", &edge);
    drop(edge);

    let report = publisher.publish(event(), &ids(&["edge"])).await;

    assert_eq!(report.failed.get("edge"), Some(&FailureReason::NoSubscriber));
    assert_eq!(publisher.subscriber_count(), 0);

    let stats = publisher.stats();
    assert_eq!(stats.events_published, 1);
    assert_eq!(stats.deliveries_failed, 1);
}

//! Concurrent fan-out of distribution events to weakly held subscribers

use parking_lot::Mutex;
use resilience::{
    retry_classified, with_deadline, Deadline, RetryError, RetryPolicy, Sleeper, TokioSleeper,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::stats::{DistributionStats, StatsCollector};
use crate::{DeliveryError, DistributionEvent, EventSubscriber};

/// Why a target ended up needing pull-fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum FailureReason {
    /// Never registered, dropped, or failed its liveness check
    NoSubscriber,
    RetriesExhausted { attempts: u32, last_error: String },
    Rejected { attempts: u32, error: String },
    DeadlineExceeded,
    TaskAborted { detail: String },
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSubscriber => "no-subscriber",
            Self::RetriesExhausted { .. } => "retries-exhausted",
            Self::Rejected { .. } => "rejected",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::TaskAborted { .. } => "task-aborted",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one publish call. Every target lands in exactly one side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishReport {
    pub event_id: String,
    pub delivered: BTreeSet<String>,
    pub failed: BTreeMap<String, FailureReason>,
}

impl PublishReport {
    pub fn failed_node_ids(&self) -> BTreeSet<String> {
        self.failed.keys().cloned().collect()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

type SubscriberTable = HashMap<String, Weak<dyn EventSubscriber>>;

/// Publisher for distribution events
///
/// Holds one weak registration per node id. Registry mutation and the
/// per-publish snapshot share a single lock; delivery runs after the lock is
/// released so a slow edge never blocks `subscribe`.
pub struct EventPublisher {
    subscribers: Mutex<SubscriberTable>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    default_deadline: Option<Duration>,
    stats: StatsCollector,
}

impl EventPublisher {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            policy,
            sleeper: Arc::new(TokioSleeper),
            default_deadline: None,
            stats: StatsCollector::new(),
        }
    }

    /// Replace the backoff sleeper (tests inject a recording one)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Bound every `publish` call by `deadline` unless overridden
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Register `subscriber` under `node_id` without extending its lifetime.
    ///
    /// Re-subscribing an id replaces the previous handler.
    pub fn subscribe<S>(&self, node_id: impl Into<String>, subscriber: &Arc<S>)
    where
        S: EventSubscriber + 'static,
    {
        let node_id = node_id.into();
        let weak = Arc::downgrade(subscriber);
        let weak: Weak<dyn EventSubscriber> = weak;

        let replaced = self.subscribers.lock().insert(node_id.clone(), weak).is_some();
        debug!(node_id = %node_id, replaced, "Subscriber registered");
    }

    /// Remove a registration; no-op if absent
    pub fn unsubscribe(&self, node_id: &str) {
        if self.subscribers.lock().remove(node_id).is_some() {
            debug!(node_id = %node_id, "Subscriber removed");
        }
    }

    /// Whether `node_id` is registered and its subscriber is still alive
    pub fn is_subscribed(&self, node_id: &str) -> bool {
        self.subscribers
            .lock()
            .get(node_id)
            .and_then(Weak::upgrade)
            .map(|s| s.is_alive())
            .unwrap_or(false)
    }

    /// Drop registrations whose subscriber is gone; returns how many
    pub fn prune(&self) -> usize {
        let mut table = self.subscribers.lock();
        let before = table.len();
        table.retain(|_, weak| weak.upgrade().map(|s| s.is_alive()).unwrap_or(false));
        before - table.len()
    }

    /// Number of registrations whose subscriber is still alive
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .values()
            .filter(|weak| weak.upgrade().map(|s| s.is_alive()).unwrap_or(false))
            .count()
    }

    pub fn stats(&self) -> DistributionStats {
        self.stats.snapshot()
    }

    /// Deliver `event` to every target, using the configured default deadline.
    pub async fn publish(&self, event: DistributionEvent, targets: &[String]) -> PublishReport {
        let deadline = self.default_deadline.map(Deadline::after);
        self.publish_until(event, targets, deadline).await
    }

    /// Deliver `event` to every target concurrently.
    ///
    /// Returns once every target's attempt sequence has concluded, or been
    /// abandoned at `deadline`. Dead or unknown targets are reported as
    /// [`FailureReason::NoSubscriber`] without an attempt.
    pub async fn publish_until(
        &self,
        event: DistributionEvent,
        targets: &[String],
        deadline: Option<Deadline>,
    ) -> PublishReport {
        self.stats.record_publish();

        let mut report = PublishReport {
            event_id: event.event_id.clone(),
            ..Default::default()
        };

        let live = self.snapshot_targets(targets, &mut report);

        let event = Arc::new(event);
        let mut handles = Vec::with_capacity(live.len());

        for (node_id, subscriber) in live {
            let task = DeliveryTask {
                node_id: node_id.clone(),
                subscriber,
                event: Arc::clone(&event),
                policy: self.policy.clone(),
                sleeper: Arc::clone(&self.sleeper),
                stats: self.stats.clone(),
            };
            handles.push((node_id, tokio::spawn(task.run(deadline))));
        }

        for (node_id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {
                    report.delivered.insert(node_id);
                }
                Ok(Err(reason)) => {
                    report.failed.insert(node_id, reason);
                }
                Err(e) => {
                    warn!(node_id = %node_id, error = %e, "Delivery task aborted");
                    self.stats.record_skipped();
                    report.failed.insert(
                        node_id,
                        FailureReason::TaskAborted {
                            detail: e.to_string(),
                        },
                    );
                }
            }
        }

        info!(
            event_id = %event.event_id,
            content_id = %event.content_id,
            kind = %event.kind,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Distribution event published"
        );

        report
    }

    /// Resolve targets to live subscribers under the lock; dead ones are
    /// pruned and recorded as failed.
    fn snapshot_targets(
        &self,
        targets: &[String],
        report: &mut PublishReport,
    ) -> Vec<(String, Arc<dyn EventSubscriber>)> {
        let unique: BTreeSet<&String> = targets.iter().collect();
        let mut live = Vec::with_capacity(unique.len());
        let mut table = self.subscribers.lock();

        for node_id in unique {
            let subscriber = table.get(node_id.as_str()).and_then(Weak::upgrade);

            match subscriber {
                Some(s) if s.is_alive() => live.push((node_id.clone(), s)),
                _ => {
                    if table.remove(node_id.as_str()).is_some() {
                        debug!(node_id = %node_id, "Pruned dead subscriber");
                    }
                    self.stats.record_skipped();
                    report
                        .failed
                        .insert(node_id.clone(), FailureReason::NoSubscriber);
                }
            }
        }

        live
    }
}

/// One (event, target) delivery sequence
struct DeliveryTask {
    node_id: String,
    subscriber: Arc<dyn EventSubscriber>,
    event: Arc<DistributionEvent>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    stats: StatsCollector,
}

impl DeliveryTask {
    async fn run(self, deadline: Option<Deadline>) -> Result<(), FailureReason> {
        let started = Instant::now();
        let node_id = self.node_id.as_str();
        let subscriber = &self.subscriber;
        let event = self.event.as_ref();

        let attempts = retry_classified(
            &self.policy,
            self.sleeper.as_ref(),
            move || async move {
                debug!(
                    node_id = %node_id,
                    event_id = %event.event_id,
                    "Delivering distribution event"
                );
                subscriber.on_event(event).await
            },
            DeliveryError::is_retryable,
        );

        let outcome = match with_deadline(deadline, attempts).await {
            Ok(Ok(attempted)) => {
                self.record(true, attempted.attempts, started);
                Ok(())
            }
            Ok(Err(err)) => {
                let attempts = err.attempts();
                self.record(false, attempts, started);
                Err(Self::classify(err))
            }
            Err(_elapsed) => {
                self.record(false, 0, started);
                Err(FailureReason::DeadlineExceeded)
            }
        };

        if let Err(reason) = &outcome {
            warn!(
                node_id = %self.node_id,
                content_id = %self.event.content_id,
                reason = %reason,
                "Delivery failed, target needs pull-fallback"
            );
        }

        outcome
    }

    fn classify(err: RetryError<DeliveryError>) -> FailureReason {
        match err {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => FailureReason::RetriesExhausted {
                attempts,
                last_error: last_error.to_string(),
            },
            RetryError::Aborted {
                error: DeliveryError::SubscriberGone(_),
                ..
            } => FailureReason::NoSubscriber,
            RetryError::Aborted { attempts, error } => FailureReason::Rejected {
                attempts,
                error: error.to_string(),
            },
        }
    }

    fn record(&self, delivered: bool, attempts: u32, started: Instant) {
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.record_delivery(delivered, attempts, latency_ms);
    }
}

/// Edge Node
///
/// A cache actor holding the last known version of the content it serves.
/// Content arrives by push from the publisher, or by pull from the origin when
/// the local copy is missing or stale. The cache map is private to the node;
/// the controller only marks and clears staleness through the methods below.
use crate::error::{CdnError, Result};
use crate::models::{CacheEntry, Content, EdgeSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use distribution_events::{DeliveryError, DistributionEvent, EventKind, EventSubscriber};
use parking_lot::RwLock;
use resilience::{presets, retry_classified, RetryPolicy, Sleeper, TokioSleeper};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Authoritative read path an edge falls back to
#[async_trait]
pub trait OriginPull: Send + Sync {
    async fn handle_pull(&self, node_id: &str, content_id: &str) -> Result<Content>;
}

/// What a push did to the local cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    /// Same checksum already cached
    Unchanged,
    /// Cached version is newer than the pushed one
    Outdated,
    MarkedStale,
}

pub struct EdgeNode {
    node_id: String,
    region: String,
    cache: RwLock<HashMap<String, CacheEntry>>,
    alive: AtomicBool,
    unreachable: AtomicBool,
    failing_pushes: AtomicU32,
    latency: Option<Duration>,
    pull_policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    pushes_received: AtomicU64,
    pulls: AtomicU64,
}

impl EdgeNode {
    pub fn new(node_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            region: region.into(),
            cache: RwLock::new(HashMap::new()),
            alive: AtomicBool::new(true),
            unreachable: AtomicBool::new(false),
            failing_pushes: AtomicU32::new(0),
            latency: None,
            pull_policy: presets::origin_pull_policy(),
            sleeper: Arc::new(TokioSleeper),
            pushes_received: AtomicU64::new(0),
            pulls: AtomicU64::new(0),
        }
    }

    /// Simulated network latency applied to every push
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_pull_policy(mut self, policy: RetryPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    /// Replace the pull backoff sleeper (tests inject a recording one)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Take the node out of service; pushes are refused from now on
    pub fn shutdown(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            info!(node_id = %self.node_id, "Edge node shut down");
        }
    }

    /// Drop every push until reset
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `count` push attempts with a transient error
    pub fn fail_next_pushes(&self, count: u32) {
        self.failing_pushes.store(count, Ordering::SeqCst);
    }

    /// Push attempts received, including failed and deduplicated ones
    pub fn push_count(&self) -> u64 {
        self.pushes_received.load(Ordering::SeqCst)
    }

    /// Pulls that reached the origin successfully
    pub fn pull_count(&self) -> u64 {
        self.pulls.load(Ordering::SeqCst)
    }

    pub async fn on_push(
        &self,
        event: &DistributionEvent,
    ) -> std::result::Result<PushOutcome, DeliveryError> {
        self.pushes_received.fetch_add(1, Ordering::SeqCst);

        if !self.is_alive() {
            return Err(DeliveryError::SubscriberGone(self.node_id.clone()));
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.unreachable.load(Ordering::SeqCst) || self.take_injected_failure() {
            return Err(DeliveryError::Transient(format!(
                "edge {} unreachable",
                self.node_id
            )));
        }

        let outcome = match event.kind {
            EventKind::Invalidate => {
                self.mark_stale(&event.content_id);
                PushOutcome::MarkedStale
            }
            EventKind::Push => {
                let payload_ref = event.payload_ref.as_deref().ok_or_else(|| {
                    DeliveryError::Rejected(format!(
                        "push for {} carries no payload reference",
                        event.content_id
                    ))
                })?;
                self.store(
                    &event.content_id,
                    event.version,
                    &event.checksum,
                    payload_ref,
                    false,
                )
            }
        };

        debug!(
            node_id = %self.node_id,
            content_id = %event.content_id,
            version = event.version,
            outcome = ?outcome,
            "Push applied"
        );

        Ok(outcome)
    }

    /// Serve `content_id`, pulling from `origin` first when the local copy is
    /// missing or stale. Fresh entries never touch the origin.
    pub async fn read(&self, origin: &dyn OriginPull, content_id: &str) -> Result<String> {
        if let Some(entry) = self.cache.read().get(content_id) {
            if !entry.stale {
                debug!(node_id = %self.node_id, content_id = %content_id, "Cache hit");
                return Ok(entry.payload_ref.clone());
            }
        }

        debug!(node_id = %self.node_id, content_id = %content_id, "Cache miss or stale, pulling");

        let content = retry_classified(
            &self.pull_policy,
            self.sleeper.as_ref(),
            || origin.handle_pull(&self.node_id, content_id),
            CdnError::is_retryable,
        )
        .await
        .map_err(|e| e.into_inner())?
        .value;

        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.store(
            &content.content_id,
            content.version,
            &content.checksum,
            &content.payload_ref,
            true,
        );

        info!(
            node_id = %self.node_id,
            content_id = %content_id,
            version = content.version,
            "Pulled from origin"
        );

        Ok(content.payload_ref)
    }

    /// Returns whether an entry existed to mark
    pub fn mark_stale(&self, content_id: &str) -> bool {
        match self.cache.write().get_mut(content_id) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        }
    }

    /// Clear the stale marker only if the cached copy has `checksum`
    pub fn clear_stale_if(&self, content_id: &str, checksum: &str) -> bool {
        match self.cache.write().get_mut(content_id) {
            Some(entry) if entry.stale && entry.checksum == checksum => {
                entry.stale = false;
                true
            }
            _ => false,
        }
    }

    pub fn cache_entry(&self, content_id: &str) -> Option<CacheEntry> {
        self.cache.read().get(content_id).cloned()
    }

    pub fn snapshot(&self) -> EdgeSnapshot {
        EdgeSnapshot {
            node_id: self.node_id.clone(),
            region: self.region.clone(),
            alive: self.is_alive(),
            entries: self
                .cache
                .read()
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect(),
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_pushes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Write a copy unless it is a duplicate or older than the cached one.
    ///
    /// An `authoritative` copy (a pull answer) also refreshes a matching stale
    /// entry, in the same critical section as the comparison.
    fn store(
        &self,
        content_id: &str,
        version: u64,
        checksum: &str,
        payload_ref: &str,
        authoritative: bool,
    ) -> PushOutcome {
        let mut cache = self.cache.write();

        if let Some(existing) = cache.get_mut(content_id) {
            if existing.checksum == checksum {
                if authoritative {
                    existing.stale = false;
                }
                return PushOutcome::Unchanged;
            }
            if existing.version > version {
                warn!(
                    node_id = %self.node_id,
                    content_id = %content_id,
                    cached = existing.version,
                    offered = version,
                    "Ignoring older version"
                );
                return PushOutcome::Outdated;
            }
        }

        cache.insert(
            content_id.to_string(),
            CacheEntry {
                version,
                checksum: checksum.to_string(),
                payload_ref: payload_ref.to_string(),
                stale: false,
                updated_at: Utc::now(),
            },
        );
        PushOutcome::Stored
    }
}

#[async_trait]
impl EventSubscriber for EdgeNode {
    async fn on_event(&self, event: &DistributionEvent) -> distribution_events::Result<()> {
        self.on_push(event).await.map(|_| ())
    }

    fn is_alive(&self) -> bool {
        EdgeNode::is_alive(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::regions;
    use std::sync::Mutex;

    struct StaticOrigin {
        content: Mutex<Option<Content>>,
        pulls: AtomicU32,
    }

    impl StaticOrigin {
        fn serving(content: Content) -> Self {
            Self {
                content: Mutex::new(Some(content)),
                pulls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl OriginPull for StaticOrigin {
        async fn handle_pull(&self, _node_id: &str, content_id: &str) -> Result<Content> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            self.content
                .lock()
                .unwrap()
                .clone()
                .filter(|c| c.content_id == content_id)
                .ok_or_else(|| CdnError::NotFound(content_id.to_string()))
        }
    }

    fn content(version: u64, checksum: &str) -> Content {
        Content {
            content_id: "img1".into(),
            version,
            checksum: checksum.into(),
            regions: regions(["US"]),
            payload_ref: format!("s3://origin/img1@{}", version),
            stale: false,
            updated_at: Utc::now(),
        }
    }

    fn push(version: u64, checksum: &str) -> DistributionEvent {
        DistributionEvent::push(
            "img1",
            version,
            checksum,
            regions(["US"]),
            format!("s3://origin/img1@{}", version),
            "test",
        )
    }

    #[tokio::test]
    async fn test_push_stores_then_dedups() {
        let node = EdgeNode::new("us-1", "US");

        assert_eq!(node.on_push(&push(1, "a")).await, Ok(PushOutcome::Stored));
        assert_eq!(node.on_push(&push(1, "a")).await, Ok(PushOutcome::Unchanged));
        assert_eq!(node.push_count(), 2);

        let entry = node.cache_entry("img1").unwrap();
        assert_eq!(entry.version, 1);
        assert!(!entry.stale);
    }

    #[tokio::test]
    async fn test_older_push_is_ignored() {
        let node = EdgeNode::new("us-1", "US");
        node.on_push(&push(3, "c")).await.unwrap();

        assert_eq!(node.on_push(&push(2, "b")).await, Ok(PushOutcome::Outdated));
        assert_eq!(node.cache_entry("img1").unwrap().version, 3);
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient_and_counted_down() {
        let node = EdgeNode::new("us-1", "US");
        node.fail_next_pushes(2);

        assert!(matches!(
            node.on_push(&push(1, "a")).await,
            Err(DeliveryError::Transient(_))
        ));
        assert!(node.on_push(&push(1, "a")).await.is_err());
        assert_eq!(node.on_push(&push(1, "a")).await, Ok(PushOutcome::Stored));
    }

    #[tokio::test]
    async fn test_shut_down_node_refuses_push() {
        let node = EdgeNode::new("us-1", "US");
        node.shutdown();

        assert!(!EventSubscriber::is_alive(&node));
        assert!(matches!(
            node.on_push(&push(1, "a")).await,
            Err(DeliveryError::SubscriberGone(_))
        ));
    }

    #[tokio::test]
    async fn test_fresh_read_never_pulls() {
        let node = EdgeNode::new("us-1", "US");
        let origin = StaticOrigin::serving(content(1, "a"));
        node.on_push(&push(1, "a")).await.unwrap();

        let payload = node.read(&origin, "img1").await.unwrap();

        assert_eq!(payload, "s3://origin/img1@1");
        assert_eq!(origin.pulls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_read_pulls_and_refreshes() {
        let node = EdgeNode::new("us-1", "US");
        let origin = StaticOrigin::serving(content(2, "b"));
        node.on_push(&push(1, "a")).await.unwrap();
        assert!(node.mark_stale("img1"));

        let payload = node.read(&origin, "img1").await.unwrap();

        assert_eq!(payload, "s3://origin/img1@2");
        assert_eq!(node.pull_count(), 1);
        let entry = node.cache_entry("img1").unwrap();
        assert_eq!(entry.version, 2);
        assert!(!entry.stale);

        // Second read is served locally
        node.read(&origin, "img1").await.unwrap();
        assert_eq!(origin.pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_content_is_not_retried() {
        let node = EdgeNode::new("us-1", "US");
        let origin = StaticOrigin::serving(content(1, "a"));

        let err = node.read(&origin, "unknown").await.unwrap_err();

        assert!(matches!(err, CdnError::NotFound(_)));
        assert_eq!(origin.pulls.load(Ordering::SeqCst), 1);
        assert!(node.cache_entry("unknown").is_none());
    }

    #[tokio::test]
    async fn test_invalidate_event_marks_stale() {
        let node = EdgeNode::new("us-1", "US");
        node.on_push(&push(1, "a")).await.unwrap();

        let invalidate = DistributionEvent::invalidate("img1", 1, "a", regions(["US"]), "test");
        assert_eq!(node.on_push(&invalidate).await, Ok(PushOutcome::MarkedStale));
        assert!(node.cache_entry("img1").unwrap().stale);
    }

    #[test]
    fn test_mark_and_clear_stale_on_missing_entry() {
        let node = EdgeNode::new("us-1", "US");
        assert!(!node.mark_stale("img1"));
        assert!(!node.clear_stale_if("img1", "a"));
    }

    #[tokio::test]
    async fn test_clear_stale_only_for_matching_checksum() {
        let node = EdgeNode::new("us-1", "US");
        node.on_push(&push(1, "a")).await.unwrap();
        node.mark_stale("img1");

        assert!(!node.clear_stale_if("img1", "b"));
        assert!(node.cache_entry("img1").unwrap().stale);

        assert!(node.clear_stale_if("img1", "a"));
        assert!(!node.cache_entry("img1").unwrap().stale);
        assert!(!node.clear_stale_if("img1", "a"));
    }

    #[tokio::test]
    async fn test_pull_of_unchanged_copy_refreshes_entry() {
        let node = EdgeNode::new("us-1", "US");
        let origin = StaticOrigin::serving(content(1, "a"));
        node.on_push(&push(1, "a")).await.unwrap();
        node.mark_stale("img1");

        node.read(&origin, "img1").await.unwrap();

        assert!(!node.cache_entry("img1").unwrap().stale);
        assert_eq!(origin.pulls.load(Ordering::SeqCst), 1);
    }

    struct FlakyOrigin {
        failures_left: AtomicU32,
        content: Content,
    }

    #[async_trait]
    impl OriginPull for FlakyOrigin {
        async fn handle_pull(&self, _node_id: &str, _content_id: &str) -> Result<Content> {
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                Err(DeliveryError::Transient("origin busy".into()).into())
            } else {
                Ok(self.content.clone())
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
    async fn test_pull_backoff_uses_injected_sleeper() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let node = EdgeNode::new("us-1", "US").with_sleeper(sleeper.clone());
        let origin = FlakyOrigin {
            failures_left: AtomicU32::new(2),
            content: content(1, "a"),
        };

        let payload = node.read(&origin, "img1").await.unwrap();

        assert_eq!(payload, "s3://origin/img1@1");
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_millis(50), Duration::from_millis(100)]
        );
    }
}

//! Content distribution events and asynchronous fan-out
//!
//! Carries "content changed" notifications from the origin to edge caches.
//!
//! # Architecture
//!
//! ```text
//! Origin registry:
//!   1. Accept a new content version (checksum changed)
//!   2. Build DistributionEvent { content_id, version, checksum, regions }
//!      ↓
//! EventPublisher::publish(event, eligible node ids)
//!   - snapshot live subscribers under the registry lock, release it
//!   - one task per target, each with its own retry/backoff sequence
//!      ↓
//! Edge nodes (EventSubscriber):
//!   3. Apply the push to the local cache, or fail
//!   4. Failed targets come back in PublishReport for pull-fallback
//! ```
//!
//! # Example
//!
//! ```no_run
//! use distribution_events::{DistributionEvent, EventPublisher};
//! use resilience::RetryPolicy;
//! use std::collections::BTreeSet;
//!
//! #[tokio::main]
//! async fn main() {
//!     let publisher = EventPublisher::new(RetryPolicy::default());
//!
//!     let event = DistributionEvent::push(
//!         "img1",
//!         1,
//!         "9f86d081884c7d65",
//!         BTreeSet::from(["US".to_string()]),
//!         "s3://origin/img1",
//!         "cdn-service",
//!     );
//!
//!     let report = publisher.publish(event, &["edge-us-1".to_string()]).await;
//!     for (node_id, reason) in &report.failed {
//!         println!("{} needs pull-fallback: {}", node_id, reason);
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

mod error;
mod publisher;
mod stats;

pub use error::DeliveryError;
pub use publisher::{EventPublisher, FailureReason, PublishReport};
pub use stats::{DistributionStats, StatsCollector};

pub type Result<T> = std::result::Result<T, DeliveryError>;

/// What the receiving edge is asked to do
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// New version available; payload reference included
    Push,
    /// Mark the cached copy stale; nothing to store
    Invalidate,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Push => write!(f, "push"),
            EventKind::Invalidate => write!(f, "invalidate"),
        }
    }
}

/// Ephemeral "content changed" message, never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributionEvent {
    pub event_id: String,
    pub kind: EventKind,
    pub content_id: String,
    pub version: u64,
    pub checksum: String,
    /// Empty set means global
    pub regions: BTreeSet<String>,
    pub payload_ref: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source: String,
}

impl DistributionEvent {
    /// Create new push event
    pub fn push(
        content_id: impl Into<String>,
        version: u64,
        checksum: impl Into<String>,
        regions: BTreeSet<String>,
        payload_ref: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            kind: EventKind::Push,
            content_id: content_id.into(),
            version,
            checksum: checksum.into(),
            regions,
            payload_ref: Some(payload_ref.into()),
            timestamp: chrono::Utc::now(),
            source: source.into(),
        }
    }

    /// Create new invalidation event
    pub fn invalidate(
        content_id: impl Into<String>,
        version: u64,
        checksum: impl Into<String>,
        regions: BTreeSet<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            kind: EventKind::Invalidate,
            content_id: content_id.into(),
            version,
            checksum: checksum.into(),
            regions,
            payload_ref: None,
            timestamp: chrono::Utc::now(),
            source: source.into(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Receiving side of a subscription.
///
/// The publisher only ever holds a weak reference to a subscriber; the
/// subscriber's lifetime belongs to whatever runtime created it.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Apply one event. Called once per attempt.
    async fn on_event(&self, event: &DistributionEvent) -> Result<()>;

    /// Liveness check run before each publish. Must not block.
    fn is_alive(&self) -> bool {
        true
    }
}

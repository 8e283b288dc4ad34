use chrono::{DateTime, Utc};
use distribution_events::PublishReport;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Set of region tags; empty means global
pub type Regions = BTreeSet<String>;

/// Build a region set from anything string-like
pub fn regions<I, S>(tags: I) -> Regions
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter().map(Into::into).collect()
}

/// Authoritative record of one content item at the origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub content_id: String,
    /// Strictly increases on every accepted change
    pub version: u64,
    /// SHA-256 of the payload, hex encoded
    pub checksum: String,
    pub regions: Regions,
    /// Location of the payload; the bytes live in the origin store
    pub payload_ref: String,
    pub stale: bool,
    pub updated_at: DateTime<Utc>,
}

impl Content {
    pub fn is_global(&self) -> bool {
        self.regions.is_empty()
    }

    /// Whether an edge in `region` should carry this content
    pub fn targets_region(&self, region: &str) -> bool {
        self.is_global() || self.regions.contains(region)
    }
}

/// Result of an upload: the current record and whether it changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub content: Content,
    /// False when the checksum matched the stored one (deduplicated)
    pub distribution_required: bool,
}

/// What an edge holds for one content id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u64,
    pub checksum: String,
    pub payload_ref: String,
    pub stale: bool,
    pub updated_at: DateTime<Utc>,
}

/// Diagnostic view of an edge node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub node_id: String,
    pub region: String,
    pub alive: bool,
    pub entries: BTreeMap<String, CacheEntry>,
}

/// What the controller did with one content change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub content_id: String,
    pub version: u64,
    pub targets: BTreeSet<String>,
    /// None when the change was deduplicated and nothing was published
    pub publish: Option<PublishReport>,
    /// Edges left stale so their next read pulls from origin
    pub fallback_armed: BTreeSet<String>,
}

impl DistributionReport {
    pub fn skipped(content: &Content) -> Self {
        Self {
            content_id: content.content_id.clone(),
            version: content.version,
            targets: BTreeSet::new(),
            publish: None,
            fallback_armed: BTreeSet::new(),
        }
    }

    pub fn was_published(&self) -> bool {
        self.publish.is_some()
    }
}

/// Result of a global invalidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReport {
    pub content: Content,
    /// Edges whose cached copy was marked stale
    pub marked_stale: BTreeSet<String>,
}

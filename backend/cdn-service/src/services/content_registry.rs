/// Content Registry
///
/// Source of truth for what an edge should hold: one record per content id
/// with version, checksum, regions and a staleness flag. Every accepted change
/// and every invalidation is announced on a broadcast change feed.
use crate::error::{CdnError, Result};
use crate::models::{Content, Regions, UploadOutcome};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use distribution_events::DistributionEvent;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::{debug, info};

const CHANGE_FEED_CAPACITY: usize = 256;

/// SHA-256 fingerprint, hex encoded
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub struct ContentRegistry {
    store: DashMap<String, Content>,
    changes: broadcast::Sender<DistributionEvent>,
    source: String,
}

impl ContentRegistry {
    pub fn new(source: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            store: DashMap::new(),
            changes,
            source: source.into(),
        }
    }

    /// Receive every accepted change and invalidation from now on
    pub fn subscribe_changes(&self) -> broadcast::Receiver<DistributionEvent> {
        self.changes.subscribe()
    }

    /// Record an upload, fingerprinting the payload reference.
    pub fn upload(
        &self,
        content_id: &str,
        payload_ref: &str,
        regions: Regions,
    ) -> Result<UploadOutcome> {
        Self::validate(content_id, payload_ref, &regions)?;
        self.apply_upload(content_id, payload_ref, fingerprint(payload_ref.as_bytes()), regions)
    }

    /// Record an upload, fingerprinting the payload bytes themselves.
    pub fn upload_with_body(
        &self,
        content_id: &str,
        payload_ref: &str,
        body: &[u8],
        regions: Regions,
    ) -> Result<UploadOutcome> {
        Self::validate(content_id, payload_ref, &regions)?;
        self.apply_upload(content_id, payload_ref, fingerprint(body), regions)
    }

    /// Mark `content_id` stale and announce the invalidation
    pub fn invalidate(&self, content_id: &str) -> Result<Content> {
        let content = {
            let mut entry = self
                .store
                .get_mut(content_id)
                .ok_or_else(|| CdnError::NotFound(format!("content {}", content_id)))?;
            entry.stale = true;
            entry.updated_at = Utc::now();
            entry.value().clone()
        };

        info!(content_id = %content_id, version = content.version, "Content invalidated");

        self.announce(DistributionEvent::invalidate(
            content.content_id.clone(),
            content.version,
            content.checksum.clone(),
            content.regions.clone(),
            self.source.clone(),
        ));

        Ok(content)
    }

    pub fn get(&self, content_id: &str) -> Option<Content> {
        self.store.get(content_id).map(|entry| entry.value().clone())
    }

    /// All records, ordered by content id
    pub fn snapshot(&self) -> Vec<Content> {
        let mut all: Vec<Content> = self.store.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by(|a, b| a.content_id.cmp(&b.content_id));
        all
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn validate(content_id: &str, payload_ref: &str, regions: &Regions) -> Result<()> {
        if content_id.trim().is_empty() {
            return Err(CdnError::ValidationError(
                "content id must not be empty".into(),
            ));
        }
        if payload_ref.trim().is_empty() {
            return Err(CdnError::ValidationError(format!(
                "payload reference for {} must not be empty",
                content_id
            )));
        }
        if regions.iter().any(|r| r.trim().is_empty()) {
            return Err(CdnError::ValidationError(format!(
                "region tags for {} must not be empty",
                content_id
            )));
        }
        Ok(())
    }

    fn apply_upload(
        &self,
        content_id: &str,
        payload_ref: &str,
        checksum: String,
        regions: Regions,
    ) -> Result<UploadOutcome> {
        let outcome = match self.store.entry(content_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get_mut();
                if current.checksum == checksum {
                    debug!(
                        content_id = %content_id,
                        version = current.version,
                        "Checksum unchanged, skipping distribution"
                    );
                    UploadOutcome {
                        content: current.clone(),
                        distribution_required: false,
                    }
                } else {
                    current.version += 1;
                    current.checksum = checksum;
                    current.regions = regions;
                    current.payload_ref = payload_ref.to_string();
                    current.stale = false;
                    current.updated_at = Utc::now();
                    UploadOutcome {
                        content: current.clone(),
                        distribution_required: true,
                    }
                }
            }
            Entry::Vacant(entry) => {
                let content = Content {
                    content_id: content_id.to_string(),
                    version: 1,
                    checksum,
                    regions,
                    payload_ref: payload_ref.to_string(),
                    stale: false,
                    updated_at: Utc::now(),
                };
                entry.insert(content.clone());
                UploadOutcome {
                    content,
                    distribution_required: true,
                }
            }
        };

        if outcome.distribution_required {
            let content = &outcome.content;
            info!(
                content_id = %content.content_id,
                version = content.version,
                checksum = %content.checksum,
                "Content version accepted"
            );
            self.announce(DistributionEvent::push(
                content.content_id.clone(),
                content.version,
                content.checksum.clone(),
                content.regions.clone(),
                content.payload_ref.clone(),
                self.source.clone(),
            ));
        }

        Ok(outcome)
    }

    fn announce(&self, event: DistributionEvent) {
        // No receivers is fine; the feed is optional
        if let Err(e) = self.changes.send(event) {
            debug!(content_id = %e.0.content_id, "No change feed listeners");
        }
    }
}

/// Origin bucket
///
/// Inbound trigger for the distribution core. An upload is recorded in the
/// registry first; listeners are told about it afterwards, so a failing
/// fan-out never fails the upload itself.
use crate::error::Result;
use crate::models::{Content, DistributionReport, Regions, UploadOutcome};
use crate::services::content_registry::ContentRegistry;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Notified after every upload, including deduplicated ones
#[async_trait]
pub trait OriginListener: Send + Sync {
    async fn on_content_changed(
        &self,
        content: &Content,
        distribution_required: bool,
    ) -> DistributionReport;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginUpload {
    pub outcome: UploadOutcome,
    /// One report per listener, in registration order
    pub distributions: Vec<DistributionReport>,
}

pub struct OriginBucket {
    registry: Arc<ContentRegistry>,
    listeners: Mutex<Vec<(String, Arc<dyn OriginListener>)>>,
}

impl OriginBucket {
    pub fn new(registry: Arc<ContentRegistry>) -> Self {
        Self {
            registry,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register `listener` under `name`, replacing any listener of that name
    pub fn add_listener(&self, name: impl Into<String>, listener: Arc<dyn OriginListener>) {
        let name = name.into();
        let mut listeners = self.listeners.lock();
        listeners.retain(|(existing, _)| *existing != name);
        listeners.push((name.clone(), listener));
        debug!(listener = %name, "Origin listener added");
    }

    /// Returns whether a listener was removed
    pub fn remove_listener(&self, name: &str) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| existing != name);
        before != listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub async fn upload(
        &self,
        content_id: &str,
        payload_ref: &str,
        regions: Regions,
    ) -> Result<OriginUpload> {
        let outcome = self.registry.upload(content_id, payload_ref, regions)?;
        Ok(self.notify(outcome).await)
    }

    pub async fn upload_with_body(
        &self,
        content_id: &str,
        payload_ref: &str,
        body: &[u8],
        regions: Regions,
    ) -> Result<OriginUpload> {
        let outcome = self
            .registry
            .upload_with_body(content_id, payload_ref, body, regions)?;
        Ok(self.notify(outcome).await)
    }

    async fn notify(&self, outcome: UploadOutcome) -> OriginUpload {
        let listeners: Vec<Arc<dyn OriginListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        info!(
            content_id = %outcome.content.content_id,
            version = outcome.content.version,
            distribution_required = outcome.distribution_required,
            listeners = listeners.len(),
            "Upload recorded"
        );

        let mut distributions = Vec::with_capacity(listeners.len());
        for listener in listeners {
            distributions.push(
                listener
                    .on_content_changed(&outcome.content, outcome.distribution_required)
                    .await,
            );
        }

        OriginUpload {
            outcome,
            distributions,
        }
    }
}

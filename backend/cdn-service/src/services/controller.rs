/// CDN Controller
///
/// Decides where each accepted change goes and keeps edges eventually
/// consistent:
/// - push to the edges whose region matches the content
/// - arm pull-fallback on edges the publisher could not reach
/// - serve authoritative pulls and clear the puller's stale marker
/// - invalidate globally by marking cached copies stale, never by pushing
///
/// Edges are held weakly; dropping the last `Arc<EdgeNode>` removes the node
/// from every fan-out without an explicit unregister.
use crate::config::Config;
use crate::error::{CdnError, Result};
use crate::models::{Content, DistributionReport, EdgeSnapshot, InvalidationReport};
use crate::services::content_registry::ContentRegistry;
use crate::services::edge_directory::{EdgeIndex, EdgeIndexKind};
use crate::services::edge_node::{EdgeNode, OriginPull};
use crate::services::origin::OriginListener;
use async_trait::async_trait;
use distribution_events::{DistributionEvent, EventPublisher};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

struct EdgeTable {
    index: Box<dyn EdgeIndex>,
    nodes: HashMap<String, Weak<EdgeNode>>,
}

impl EdgeTable {
    fn live(&self, node_id: &str) -> Option<Arc<EdgeNode>> {
        self.nodes.get(node_id).and_then(Weak::upgrade)
    }

    /// Drop nodes whose last handle is gone from both maps; returns their ids
    fn prune(&mut self) -> Vec<String> {
        let dead: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, weak)| weak.strong_count() == 0)
            .map(|(node_id, _)| node_id.clone())
            .collect();

        for node_id in &dead {
            self.nodes.remove(node_id);
            self.index.unregister(node_id);
        }
        dead
    }
}

pub struct CdnController {
    registry: Arc<ContentRegistry>,
    publisher: Arc<EventPublisher>,
    edges: RwLock<EdgeTable>,
    source: String,
}

impl CdnController {
    pub fn new(
        registry: Arc<ContentRegistry>,
        publisher: Arc<EventPublisher>,
        index: EdgeIndexKind,
        source: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            publisher,
            edges: RwLock::new(EdgeTable {
                index: index.build(),
                nodes: HashMap::new(),
            }),
            source: source.into(),
        }
    }

    /// Wire a controller with its own registry and publisher from `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(ContentRegistry::new(config.service_name.clone())),
            Arc::new(config.build_publisher()),
            config.edge_index,
            config.service_name.clone(),
        )
    }

    pub fn registry(&self) -> &Arc<ContentRegistry> {
        &self.registry
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    pub fn index_kind(&self) -> EdgeIndexKind {
        self.edges.read().index.kind()
    }

    /// Add `node` to the directory and subscribe it for pushes.
    ///
    /// Re-registering a node id replaces the previous node and region.
    pub fn register_edge(&self, node: &Arc<EdgeNode>) {
        let node_id = node.node_id().to_string();
        {
            let mut edges = self.edges.write();
            edges.index.register(&node_id, node.region());
            edges.nodes.insert(node_id.clone(), Arc::downgrade(node));
        }
        self.publisher.subscribe(node_id.clone(), node);

        info!(node_id = %node_id, region = %node.region(), "Edge registered");
    }

    /// Returns whether the node was registered
    pub fn unregister_edge(&self, node_id: &str) -> bool {
        let removed = {
            let mut edges = self.edges.write();
            edges.nodes.remove(node_id);
            edges.index.unregister(node_id)
        };
        self.publisher.unsubscribe(node_id);

        if removed {
            info!(node_id = %node_id, "Edge unregistered");
        }
        removed
    }

    pub fn edge(&self, node_id: &str) -> Option<Arc<EdgeNode>> {
        self.edges.read().live(node_id)
    }

    /// Registered edges that still exist
    pub fn edge_count(&self) -> usize {
        self.edges
            .read()
            .nodes
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Registered edges whose region intersects `content.regions`, or all
    /// edges for global content. Dropped edges are pruned first.
    pub fn eligible_targets(&self, content: &Content) -> BTreeSet<String> {
        let mut edges = self.edges.write();

        // Unsubscribe under the table lock so a concurrent re-register of the
        // same id is not undone
        for node_id in edges.prune() {
            self.publisher.unsubscribe(&node_id);
            debug!(node_id = %node_id, "Pruned dropped edge");
        }
        edges.index.query(&content.regions)
    }

    /// Fan an accepted change out to eligible edges.
    ///
    /// Deduplicated changes publish nothing. Targets the publisher reports as
    /// failed get pull-fallback armed; the push itself is not retried here.
    pub async fn on_content_changed(
        &self,
        content: &Content,
        distribution_required: bool,
    ) -> DistributionReport {
        if !distribution_required {
            debug!(
                content_id = %content.content_id,
                version = content.version,
                "No distribution required"
            );
            return DistributionReport::skipped(content);
        }

        let targets = self.eligible_targets(content);
        let event = DistributionEvent::push(
            content.content_id.clone(),
            content.version,
            content.checksum.clone(),
            content.regions.clone(),
            content.payload_ref.clone(),
            self.source.clone(),
        );

        let target_list: Vec<String> = targets.iter().cloned().collect();
        let publish = self.publisher.publish(event, &target_list).await;

        let fallback_armed = if publish.all_delivered() {
            BTreeSet::new()
        } else {
            self.on_publish_failures(&publish.failed_node_ids(), content)
        };

        info!(
            content_id = %content.content_id,
            version = content.version,
            targets = targets.len(),
            delivered = publish.delivered.len(),
            failed = publish.failed.len(),
            "Distribution finished"
        );

        DistributionReport {
            content_id: content.content_id.clone(),
            version: content.version,
            targets,
            publish: Some(publish),
            fallback_armed,
        }
    }

    /// Leave every failed edge in a state that forces a pull on next read.
    ///
    /// Returns the edges that were armed. Nodes that no longer exist are
    /// skipped; a node with no cached copy is armed already.
    pub fn on_publish_failures(
        &self,
        failed_node_ids: &BTreeSet<String>,
        content: &Content,
    ) -> BTreeSet<String> {
        let edges = self.edges.read();
        let mut armed = BTreeSet::new();

        for node_id in failed_node_ids {
            match edges.live(node_id) {
                Some(node) => {
                    node.mark_stale(&content.content_id);
                    armed.insert(node_id.clone());
                }
                None => {
                    debug!(node_id = %node_id, "Failed edge no longer exists, nothing to arm");
                }
            }
        }

        if !armed.is_empty() {
            warn!(
                content_id = %content.content_id,
                version = content.version,
                edges = ?armed,
                "Pull-fallback armed"
            );
        }
        armed
    }

    /// Authoritative read for an edge whose copy is stale or missing
    pub async fn handle_pull(&self, node_id: &str, content_id: &str) -> Result<Content> {
        let content = self
            .registry
            .get(content_id)
            .ok_or_else(|| CdnError::NotFound(format!("content {}", content_id)))?;

        let node = self
            .edge(node_id)
            .ok_or_else(|| CdnError::NotFound(format!("edge node {}", node_id)))?;
        // Only a copy that already matches the record becomes fresh here; an
        // older copy stays stale until the edge stores the pulled version
        node.clear_stale_if(content_id, &content.checksum);

        debug!(
            node_id = %node_id,
            content_id = %content_id,
            version = content.version,
            "Pull served"
        );

        Ok(content)
    }

    /// Invalidate `content_id` at the registry and mark every cached copy
    /// stale. Nothing is pushed; edges refresh on their next read.
    pub fn invalidate_globally(&self, content_id: &str) -> Result<InvalidationReport> {
        let content = self.registry.invalidate(content_id)?;

        let marked_stale: BTreeSet<String> = {
            let edges = self.edges.read();
            edges
                .nodes
                .iter()
                .filter_map(|(node_id, weak)| {
                    let node = weak.upgrade()?;
                    node.mark_stale(content_id).then(|| node_id.clone())
                })
                .collect()
        };

        info!(
            content_id = %content_id,
            version = content.version,
            edges = marked_stale.len(),
            "Global invalidation applied"
        );

        Ok(InvalidationReport {
            content,
            marked_stale,
        })
    }

    /// Diagnostic view of every live edge, ordered by node id
    pub fn edge_snapshots(&self) -> Vec<EdgeSnapshot> {
        let nodes: Vec<Arc<EdgeNode>> = {
            let edges = self.edges.read();
            edges.nodes.values().filter_map(Weak::upgrade).collect()
        };

        let mut snapshots: Vec<EdgeSnapshot> = nodes.iter().map(|n| n.snapshot()).collect();
        snapshots.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        snapshots
    }
}

#[async_trait]
impl OriginPull for CdnController {
    async fn handle_pull(&self, node_id: &str, content_id: &str) -> Result<Content> {
        CdnController::handle_pull(self, node_id, content_id).await
    }
}

#[async_trait]
impl OriginListener for CdnController {
    async fn on_content_changed(
        &self,
        content: &Content,
        distribution_required: bool,
    ) -> DistributionReport {
        CdnController::on_content_changed(self, content, distribution_required).await
    }
}

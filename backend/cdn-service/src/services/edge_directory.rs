/// Edge directory strategies
///
/// Answers "which registered edges should carry content tagged with these
/// regions". The strategy is picked once, at controller construction.
use crate::error::CdnError;
use crate::models::Regions;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

pub trait EdgeIndex: Send + Sync {
    /// Add or move a node; re-registering replaces its region
    fn register(&mut self, node_id: &str, region: &str);

    /// Returns whether the node was present
    fn unregister(&mut self, node_id: &str) -> bool;

    /// Nodes whose region is in `regions`, or every node when `regions` is empty
    fn query(&self, regions: &Regions) -> BTreeSet<String>;

    fn all(&self) -> BTreeSet<String>;

    fn kind(&self) -> EdgeIndexKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeIndexKind {
    /// Linear scan over a flat list
    List,
    /// Region tag -> node ids
    Region,
}

impl EdgeIndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Region => "region",
        }
    }

    pub fn build(self) -> Box<dyn EdgeIndex> {
        match self {
            Self::List => Box::new(ListIndex::default()),
            Self::Region => Box::new(RegionIndex::default()),
        }
    }
}

impl FromStr for EdgeIndexKind {
    type Err = CdnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "list" | "scan" => Ok(Self::List),
            "region" | "regional" => Ok(Self::Region),
            other => Err(CdnError::Config(format!(
                "unknown edge index '{}', expected 'list' or 'region'",
                other
            ))),
        }
    }
}

#[derive(Debug, Default)]
pub struct ListIndex {
    nodes: Vec<(String, String)>,
}

impl EdgeIndex for ListIndex {
    fn register(&mut self, node_id: &str, region: &str) {
        self.unregister(node_id);
        self.nodes.push((node_id.to_string(), region.to_string()));
    }

    fn unregister(&mut self, node_id: &str) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|(id, _)| id != node_id);
        before != self.nodes.len()
    }

    fn query(&self, regions: &Regions) -> BTreeSet<String> {
        self.nodes
            .iter()
            .filter(|(_, region)| regions.is_empty() || regions.contains(region))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn all(&self) -> BTreeSet<String> {
        self.nodes.iter().map(|(id, _)| id.clone()).collect()
    }

    fn kind(&self) -> EdgeIndexKind {
        EdgeIndexKind::List
    }
}

#[derive(Debug, Default)]
pub struct RegionIndex {
    by_region: HashMap<String, BTreeSet<String>>,
    region_of: HashMap<String, String>,
}

impl EdgeIndex for RegionIndex {
    fn register(&mut self, node_id: &str, region: &str) {
        self.unregister(node_id);
        self.by_region
            .entry(region.to_string())
            .or_default()
            .insert(node_id.to_string());
        self.region_of
            .insert(node_id.to_string(), region.to_string());
    }

    fn unregister(&mut self, node_id: &str) -> bool {
        let Some(region) = self.region_of.remove(node_id) else {
            return false;
        };

        if let Some(nodes) = self.by_region.get_mut(&region) {
            nodes.remove(node_id);
            if nodes.is_empty() {
                self.by_region.remove(&region);
            }
        }
        true
    }

    fn query(&self, regions: &Regions) -> BTreeSet<String> {
        if regions.is_empty() {
            return self.all();
        }

        regions
            .iter()
            .filter_map(|region| self.by_region.get(region))
            .flatten()
            .cloned()
            .collect()
    }

    fn all(&self) -> BTreeSet<String> {
        self.region_of.keys().cloned().collect()
    }

    fn kind(&self) -> EdgeIndexKind {
        EdgeIndexKind::Region
    }
}

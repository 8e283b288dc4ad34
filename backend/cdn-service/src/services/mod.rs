pub mod content_registry;
pub mod controller;
pub mod edge_directory;
pub mod edge_node;
pub mod origin;

pub use content_registry::{fingerprint, ContentRegistry};
pub use controller::CdnController;
pub use edge_directory::{EdgeIndex, EdgeIndexKind, ListIndex, RegionIndex};
pub use edge_node::{EdgeNode, OriginPull, PushOutcome};
pub use origin::{OriginBucket, OriginListener, OriginUpload};

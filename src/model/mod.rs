//! Typed representations of VPC resources and their dependency graph
//!
//! A capture run produces one [`TopologyGraph`] per VPC: resource nodes
//! plus ownership (`contains`) and reference (`references`) edges.
//! Ownership edges form a forest rooted at the VPC node; reference edges
//! may form cycles or point outside the graph entirely.

use thiserror::Error;

pub mod edge;
pub mod graph;
pub mod node;

pub use edge::{EdgeResolution, Relation, ResourceEdge};
pub use graph::{Snapshot, SnapshotInfo, TopologyGraph};
pub use node::{ResourceKind, ResourceNode};

/// Errors raised by graph construction and invariant checks.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A node with this capture-time id already exists in the graph
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    /// An edge endpoint names no node of the graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The graph has no VPC node
    #[error("Graph has no root VPC node")]
    MissingRoot,

    /// The graph has more than one VPC node
    #[error("Graph has more than one root VPC node")]
    MultipleRoots,

    /// A non-root node does not have exactly one owner
    #[error("Node {source_id} has {owners} ownership edges, expected exactly 1")]
    OwnershipViolation {
        /// The offending node
        source_id: String,
        /// How many incoming `contains` edges it has
        owners: usize,
    },
}

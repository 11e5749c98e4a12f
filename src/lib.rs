//! # vpchron
//!
//! Backs up and restores cloud virtual-network (VPC) configuration by
//! capturing the describable state of a VPC and its dependent resources
//! as a dependency graph, serializing that graph to versioned snapshots,
//! and re-creating it in an environment where every resource gets a new
//! identity.
//!
//! ## Overview
//!
//! The capture side reads resources through an abstract control-plane
//! collaborator and assembles one [`model::TopologyGraph`] per VPC:
//! ownership (`contains`) edges form a forest rooted at the VPC node,
//! while reference (`references`) edges may form cycles or point outside
//! the graph. The restore side computes a deterministic two-phase plan —
//! create skeletons in topological order, then attach reference-bearing
//! attributes once every target id exists — and executes it with a
//! bounded worker pool, an identity remap table, capped-backoff retries,
//! and durable per-step progress that makes interrupted runs resumable.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vpchron::control_plane::InMemoryControlPlane;
//! use vpchron::executor::InMemoryProgressStore;
//! use vpchron::orchestrator::{BackupOrchestrator, RestoreOrchestrator};
//! use vpchron::storage::InMemorySnapshotStore;
//!
//! # async fn example() -> vpchron::Result<()> {
//! let control_plane = Arc::new(InMemoryControlPlane::new());
//! let store = Arc::new(InMemorySnapshotStore::new());
//!
//! // Capture every VPC in scope into one timestamped snapshot.
//! let backup = BackupOrchestrator::new(control_plane.clone(), store.clone(), "us-east-1");
//! let outcome = backup.run().await?;
//!
//! // Re-create the captured topology from the most recent snapshot.
//! let progress = Arc::new(InMemoryProgressStore::new());
//! let restore = RestoreOrchestrator::new(control_plane, store, progress, "us-east-1");
//! let result = restore.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`model`]: resource nodes, edges, and the per-VPC topology graph
//! - [`reader`]: exhaustive per-VPC capture through the control plane
//! - [`codec`]: versioned, human-diffable snapshot serialization
//! - [`planner`]: two-phase dependency-ordered restore planning
//! - [`executor`]: plan execution with remapping, retries, and resume
//! - [`storage`]: snapshot store collaborators (file, memory, S3)
//! - [`control_plane`]: the abstract cloud control-plane interface
//! - [`orchestrator`]: backup and restore sequencing

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for vpchron operations
pub type Result<T> = std::result::Result<T, VpchronError>;

/// Main error type for vpchron operations
#[derive(Error, Debug)]
pub enum VpchronError {
    /// Graph model violation (duplicate node, broken ownership forest)
    #[error("Model error: {0}")]
    Model(#[from] model::ModelError),

    /// Capture failed; no partial snapshot was produced
    #[error("Capture error: {0}")]
    Capture(#[from] reader::CaptureError),

    /// Snapshot could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] codec::CodecError),

    /// Restore plan could not be computed
    #[error("Planning error: {0}")]
    Plan(#[from] planner::PlanError),

    /// Restore run infrastructure failure
    #[error("Restore error: {0}")]
    Restore(#[from] executor::RestoreError),

    /// Snapshot storage failure
    #[error("Storage error: {0}")]
    Store(#[from] storage::StoreError),

    /// Control-plane failure outside a retried step
    #[error("Control-plane error: {0}")]
    ControlPlane(#[from] control_plane::ControlPlaneError),

    /// Progress store failure
    #[error("Progress error: {0}")]
    Progress(#[from] executor::ProgressError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No snapshot exists under the given storage prefix
    #[error("No snapshots found under {0}")]
    NoSnapshots(String),

    /// Stored payload does not match its recorded checksum
    #[error("Snapshot checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum recorded at backup time
        expected: String,
        /// Checksum of the payload that was read back
        actual: String,
    },

    /// The requested VPC is not part of the selected snapshot
    #[error("VPC {0} not present in snapshot")]
    VpcNotInSnapshot(String),

    /// Join error from async tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Resource model: nodes, edges, graphs, snapshots
pub mod model;

/// Abstract control-plane collaborator
pub mod control_plane;

/// Topology capture
pub mod reader;

/// Snapshot wire codec
pub mod codec;

/// Dependency-ordered restore planning
pub mod planner;

/// Restore execution
pub mod executor;

/// Snapshot storage collaborators
pub mod storage;

/// Backup and restore orchestration
pub mod orchestrator;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_creation() {
        let node = model::ResourceNode::new(model::ResourceKind::Vpc, "vpc-1");

        assert_eq!(node.source_id, "vpc-1");
        assert!(node.attributes.is_empty());
        assert!(node.tags.is_empty());
    }

    #[test]
    fn test_error_conversion() {
        let err: VpchronError = model::ModelError::MissingRoot.into();
        assert!(matches!(err, VpchronError::Model(_)));
    }
}

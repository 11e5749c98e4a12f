//! Abstract control-plane collaborator
//!
//! The engine never talks to a specific cloud API. It requires exactly the
//! capability set defined by [`ControlPlane`]: list describable resources,
//! create a resource from attributes plus tags, and patch attributes onto
//! an existing resource. Tagging support on create is what makes restore
//! runs idempotent.

mod memory;

pub use memory::InMemoryControlPlane;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::model::ResourceKind;

/// Errors surfaced by a control-plane collaborator.
///
/// The executor retries [`Transient`](ControlPlaneError::Transient)
/// failures with capped backoff; everything else is fatal for the step.
#[derive(Error, Debug, Clone)]
pub enum ControlPlaneError {
    /// Rate limiting, eventual-consistency lag, connection resets
    #[error("Transient control-plane failure: {0}")]
    Transient(String),

    /// The named resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The request was understood and rejected
    #[error("Control-plane rejected request: {0}")]
    Rejected(String),

    /// Anything else the collaborator could not classify
    #[error("Control-plane API error: {0}")]
    Api(String),
}

impl ControlPlaneError {
    /// Whether the executor should retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, ControlPlaneError::Transient(_))
    }
}

/// The scope a listing call runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VpcScope {
    /// Restrict the listing to one VPC's resources; `None` lists across
    /// the whole region (only meaningful for the `Vpc` kind itself).
    pub vpc_id: Option<String>,
}

impl VpcScope {
    /// Scope covering every VPC in the region.
    pub fn region_wide() -> Self {
        Self { vpc_id: None }
    }

    /// Scope restricted to one VPC.
    pub fn vpc(id: impl Into<String>) -> Self {
        Self {
            vpc_id: Some(id.into()),
        }
    }
}

/// One resource as described by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResource {
    /// Resource kind
    pub kind: ResourceKind,

    /// Environment-assigned identity
    pub id: String,

    /// Describable configuration
    pub attributes: BTreeMap<String, Value>,

    /// Tags on the resource
    pub tags: BTreeMap<String, String>,
}

/// The capability set the engine requires of a cloud control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// List every resource of one kind within a scope. Implementations
    /// must enumerate exhaustively (drain pagination) or fail.
    async fn list_resources(
        &self,
        scope: &VpcScope,
        kind: ResourceKind,
    ) -> Result<Vec<RawResource>, ControlPlaneError>;

    /// Create a resource and return its newly assigned id. Tags are
    /// applied atomically with creation.
    async fn create_resource(
        &self,
        kind: ResourceKind,
        attributes: BTreeMap<String, Value>,
        tags: BTreeMap<String, String>,
    ) -> Result<String, ControlPlaneError>;

    /// Patch additional attributes onto an existing resource.
    async fn patch_resource(
        &self,
        kind: ResourceKind,
        id: &str,
        attributes: BTreeMap<String, Value>,
    ) -> Result<(), ControlPlaneError>;

    /// Find a resource of a kind bearing every one of the given tags.
    /// Used to re-discover resources created by an interrupted restore run.
    async fn find_by_tags(
        &self,
        kind: ResourceKind,
        tags: &BTreeMap<String, String>,
    ) -> Result<Option<RawResource>, ControlPlaneError>;
}

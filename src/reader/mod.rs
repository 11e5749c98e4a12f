//! Topology reader
//!
//! Queries the control-plane collaborator and assembles one
//! [`TopologyGraph`] per VPC. Enumeration is exhaustive per VPC: if any
//! kind's listing fails mid-capture, the whole VPC capture fails and no
//! partial graph is returned. Ownership edges come from explicit parent-id
//! attributes; reference edges come from scanning attribute values for
//! id-shaped strings against the set of ids in the graph. Id-shaped values
//! that resolve to nothing in-graph are kept verbatim as external
//! references.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::control_plane::{ControlPlane, ControlPlaneError, RawResource, VpcScope};
use crate::model::{ModelError, ResourceEdge, ResourceKind, ResourceNode, TopologyGraph};

/// Errors raised during topology capture.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// A kind's enumeration failed mid-capture; no partial graph exists
    #[error("Incomplete capture of {vpc_id}: listing {kind} failed: {source}")]
    Incomplete {
        /// The VPC whose capture was abandoned
        vpc_id: String,
        /// The kind whose listing failed
        kind: ResourceKind,
        /// The underlying control-plane failure
        source: ControlPlaneError,
    },

    /// VPC discovery itself failed
    #[error("VPC discovery failed: {0}")]
    Discovery(#[source] ControlPlaneError),

    /// The requested VPC does not exist in this scope
    #[error("VPC not found: {0}")]
    VpcNotFound(String),

    /// The assembled graph violates a model invariant
    #[error("Captured graph is malformed: {0}")]
    Model(#[from] ModelError),
}

/// Capture tuning knobs.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture only this VPC instead of every VPC in scope
    pub vpc_id: Option<String>,
    /// Bound on concurrent per-kind listing calls, to respect control
    /// plane rate limits
    pub max_concurrent_kinds: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            vpc_id: None,
            max_concurrent_kinds: 4,
        }
    }
}

impl CaptureConfig {
    /// Restrict the capture to one VPC.
    pub fn with_vpc(mut self, vpc_id: impl Into<String>) -> Self {
        self.vpc_id = Some(vpc_id.into());
        self
    }

    /// Set the per-kind listing concurrency bound.
    pub fn with_max_concurrent_kinds(mut self, limit: usize) -> Self {
        self.max_concurrent_kinds = limit.max(1);
        self
    }
}

/// Reads VPC topologies from a control plane.
pub struct TopologyReader {
    control_plane: Arc<dyn ControlPlane>,
    config: CaptureConfig,
    id_pattern: Regex,
}

impl TopologyReader {
    /// Create a reader over a control plane.
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: CaptureConfig) -> Self {
        // matches environment-assigned resource ids like vpc-0a1b2c,
        // sg-deadbeef, pcx-other-account
        let id_pattern = Regex::new(
            r"^(vpc|subnet|rtb|route|igw|nat|sg|sgr|acl|aclent|pcx)-[0-9a-zA-Z][0-9a-zA-Z-]*$",
        )
        .expect("id pattern is a valid regex literal");
        Self {
            control_plane,
            config,
            id_pattern,
        }
    }

    /// Capture every VPC in scope (or the one configured VPC), one graph
    /// each, in discovery order.
    #[instrument(skip(self))]
    pub async fn read_all(&self) -> Result<Vec<TopologyGraph>, CaptureError> {
        let vpcs = self.discover_vpcs().await?;
        info!(count = vpcs.len(), "discovered VPCs");

        let mut graphs = Vec::with_capacity(vpcs.len());
        for vpc in vpcs {
            graphs.push(self.read_vpc(&vpc).await?);
        }
        Ok(graphs)
    }

    async fn discover_vpcs(&self) -> Result<Vec<RawResource>, CaptureError> {
        match &self.config.vpc_id {
            Some(vpc_id) => {
                let found = self
                    .control_plane
                    .list_resources(&VpcScope::vpc(vpc_id.clone()), ResourceKind::Vpc)
                    .await
                    .map_err(CaptureError::Discovery)?;
                if found.is_empty() {
                    return Err(CaptureError::VpcNotFound(vpc_id.clone()));
                }
                Ok(found)
            }
            None => self
                .control_plane
                .list_resources(&VpcScope::region_wide(), ResourceKind::Vpc)
                .await
                .map_err(CaptureError::Discovery),
        }
    }

    /// Capture one VPC's full topology. All-or-nothing: a listing failure
    /// for any kind abandons the capture.
    #[instrument(skip(self, vpc), fields(vpc_id = %vpc.id))]
    pub async fn read_vpc(&self, vpc: &RawResource) -> Result<TopologyGraph, CaptureError> {
        let scope = VpcScope::vpc(vpc.id.clone());
        let limiter = Arc::new(Semaphore::new(self.config.max_concurrent_kinds));

        // No ordering dependency between kinds; fan out bounded listings.
        let listings = join_all(
            ResourceKind::ALL
                .iter()
                .filter(|kind| **kind != ResourceKind::Vpc)
                .map(|&kind| {
                    let scope = scope.clone();
                    let limiter = limiter.clone();
                    let control_plane = self.control_plane.clone();
                    async move {
                        let _permit = limiter.acquire().await;
                        let listed = control_plane.list_resources(&scope, kind).await;
                        (kind, listed)
                    }
                }),
        )
        .await;

        let mut resources: Vec<RawResource> = Vec::new();
        for (kind, listed) in listings {
            match listed {
                Ok(batch) => {
                    debug!(%kind, count = batch.len(), "listed resources");
                    resources.extend(batch);
                }
                Err(source) => {
                    return Err(CaptureError::Incomplete {
                        vpc_id: vpc.id.clone(),
                        kind,
                        source,
                    });
                }
            }
        }

        self.assemble(vpc, resources)
    }

    fn assemble(
        &self,
        vpc: &RawResource,
        resources: Vec<RawResource>,
    ) -> Result<TopologyGraph, CaptureError> {
        let mut graph = TopologyGraph::new();
        graph.add_node(node_of(vpc))?;
        for raw in &resources {
            graph.add_node(node_of(raw))?;
        }

        // Ownership edges from explicit parent-id attributes.
        for raw in &resources {
            let node = node_of(raw);
            match node.parent_id() {
                Some(parent) if graph.contains(parent) => {
                    graph.add_edge(ResourceEdge::contains(parent, &raw.id))?;
                }
                Some(parent) => {
                    return Err(CaptureError::Model(ModelError::NodeNotFound(
                        parent.to_string(),
                    )));
                }
                None => {
                    return Err(CaptureError::Model(ModelError::OwnershipViolation {
                        source_id: raw.id.clone(),
                        owners: 0,
                    }));
                }
            }
        }

        // Reference edges from id-shaped attribute values.
        let mut all_nodes: Vec<&RawResource> = Vec::with_capacity(resources.len() + 1);
        all_nodes.push(vpc);
        all_nodes.extend(resources.iter());
        for raw in all_nodes {
            let parent_attr = raw.kind.parent_attribute();
            let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
            for (attr, value) in &raw.attributes {
                if Some(attr.as_str()) == parent_attr {
                    continue;
                }
                collect_id_strings(&self.id_pattern, value, &mut |candidate| {
                    if candidate != raw.id {
                        seen.insert((attr.clone(), candidate.to_string()));
                    }
                });
            }
            for (attr, target) in seen {
                if graph.contains(&target) {
                    graph.add_edge(ResourceEdge::references(&raw.id, &target, &attr))?;
                } else {
                    warn!(
                        from = %raw.id,
                        to = %target,
                        via = %attr,
                        "attribute names a resource outside the graph; keeping as external reference"
                    );
                    graph.add_edge(ResourceEdge::external(&raw.id, &target, &attr))?;
                }
            }
        }

        graph.validate()?;
        Ok(graph)
    }
}

fn node_of(raw: &RawResource) -> ResourceNode {
    ResourceNode {
        kind: raw.kind,
        source_id: raw.id.clone(),
        attributes: raw.attributes.clone(),
        tags: raw.tags.clone(),
    }
}

fn collect_id_strings(pattern: &Regex, value: &Value, found: &mut impl FnMut(&str)) {
    match value {
        Value::String(s) => {
            if pattern.is_match(s) {
                found(s);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_id_strings(pattern, item, found);
            }
        }
        Value::Object(fields) => {
            for item in fields.values() {
                collect_id_strings(pattern, item, found);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::InMemoryControlPlane;
    use crate::model::{EdgeResolution, Relation};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn raw(kind: ResourceKind, id: &str, attrs: &[(&str, Value)]) -> RawResource {
        RawResource {
            kind,
            id: id.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            tags: BTreeMap::new(),
        }
    }

    fn seeded_plane() -> InMemoryControlPlane {
        let plane = InMemoryControlPlane::new();
        plane.seed(None, raw(ResourceKind::Vpc, "vpc-1", &[("cidrBlock", json!("10.0.0.0/16"))]));
        plane.seed(
            Some("vpc-1"),
            raw(
                ResourceKind::Subnet,
                "subnet-1",
                &[("vpcId", json!("vpc-1")), ("cidrBlock", json!("10.0.1.0/24"))],
            ),
        );
        plane.seed(
            Some("vpc-1"),
            raw(
                ResourceKind::RouteTable,
                "rtb-1",
                &[("vpcId", json!("vpc-1")), ("associatedSubnets", json!(["subnet-1"]))],
            ),
        );
        plane.seed(
            Some("vpc-1"),
            raw(
                ResourceKind::Route,
                "route-1",
                &[
                    ("routeTableId", json!("rtb-1")),
                    ("destinationCidrBlock", json!("0.0.0.0/0")),
                    ("gatewayId", json!("igw-elsewhere")),
                ],
            ),
        );
        plane
    }

    #[tokio::test]
    async fn test_capture_builds_ownership_and_reference_edges() {
        let plane = Arc::new(seeded_plane());
        let reader = TopologyReader::new(plane, CaptureConfig::default());

        let graphs = reader.read_all().await.unwrap();
        assert_eq!(graphs.len(), 1);
        let graph = &graphs[0];

        assert_eq!(graph.node_count(), 4);
        assert!(graph
            .ownership_edges()
            .iter()
            .any(|e| e.from == "vpc-1" && e.to == "subnet-1"));

        let rtb_refs = graph.references_from("rtb-1");
        assert_eq!(rtb_refs.len(), 1);
        assert_eq!(rtb_refs[0].to, "subnet-1");
        assert_eq!(rtb_refs[0].resolution, EdgeResolution::InGraph);
        assert_eq!(rtb_refs[0].via.as_deref(), Some("associatedSubnets"));
    }

    #[tokio::test]
    async fn test_out_of_graph_id_becomes_external_reference() {
        let plane = Arc::new(seeded_plane());
        let reader = TopologyReader::new(plane, CaptureConfig::default());

        let graph = reader.read_all().await.unwrap().remove(0);
        let route_refs = graph.references_from("route-1");
        assert_eq!(route_refs.len(), 1);
        assert_eq!(route_refs[0].to, "igw-elsewhere");
        assert_eq!(route_refs[0].resolution, EdgeResolution::External);
        assert_eq!(route_refs[0].relation, Relation::References);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_whole_vpc_capture() {
        let plane = seeded_plane();
        plane.fail_list(
            ResourceKind::SecurityGroup,
            ControlPlaneError::Api("listing exploded".to_string()),
        );
        let reader = TopologyReader::new(Arc::new(plane), CaptureConfig::default());

        let err = reader.read_all().await.unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Incomplete {
                kind: ResourceKind::SecurityGroup,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_vpc_filter_fails() {
        let plane = Arc::new(seeded_plane());
        let reader = TopologyReader::new(
            plane,
            CaptureConfig::default().with_vpc("vpc-does-not-exist"),
        );

        let err = reader.read_all().await.unwrap_err();
        assert!(matches!(err, CaptureError::VpcNotFound(_)));
    }
}

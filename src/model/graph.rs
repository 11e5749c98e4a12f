//! The per-VPC topology graph and the snapshot container

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use super::edge::{EdgeResolution, Relation, ResourceEdge};
use super::node::{ResourceKind, ResourceNode};
use super::ModelError;

/// The dependency graph of one VPC's resources at capture time.
///
/// Nodes are held in insertion order in a directed graph; a side map takes
/// capture-time ids to graph indices. Reference edges whose target lives
/// outside the graph cannot be represented as petgraph edges (the target
/// node does not exist) and are kept in a side list instead.
#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    graph: DiGraph<ResourceNode, ResourceEdge>,
    node_map: HashMap<String, NodeIndex>,
    external_refs: Vec<ResourceEdge>,
}

impl TopologyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Capture-time ids must be unique within a graph.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<NodeIndex, ModelError> {
        if self.node_map.contains_key(&node.source_id) {
            return Err(ModelError::DuplicateNode(node.source_id));
        }
        let id = node.source_id.clone();
        let idx = self.graph.add_node(node);
        self.node_map.insert(id, idx);
        Ok(idx)
    }

    /// Add an edge. Both endpoints must already be nodes of this graph,
    /// except for external reference edges whose target is out-of-graph.
    pub fn add_edge(&mut self, edge: ResourceEdge) -> Result<(), ModelError> {
        let from_idx = *self
            .node_map
            .get(&edge.from)
            .ok_or_else(|| ModelError::NodeNotFound(edge.from.clone()))?;

        if edge.relation == Relation::References && edge.resolution == EdgeResolution::External {
            self.external_refs.push(edge);
            return Ok(());
        }

        let to_idx = *self
            .node_map
            .get(&edge.to)
            .ok_or_else(|| ModelError::NodeNotFound(edge.to.clone()))?;
        self.graph.add_edge(from_idx, to_idx, edge);
        Ok(())
    }

    /// Look up a node by capture-time id.
    pub fn node(&self, source_id: &str) -> Option<&ResourceNode> {
        self.node_map
            .get(source_id)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    /// Whether a capture-time id names a node of this graph.
    pub fn contains(&self, source_id: &str) -> bool {
        self.node_map.contains_key(source_id)
    }

    /// All nodes, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.graph.node_indices().map(|idx| &self.graph[idx])
    }

    /// All edges, in-graph first (insertion order), then external refs.
    pub fn edges(&self) -> Vec<&ResourceEdge> {
        self.graph
            .edge_indices()
            .filter_map(|idx| self.graph.edge_weight(idx))
            .chain(self.external_refs.iter())
            .collect()
    }

    /// Ownership edges only.
    pub fn ownership_edges(&self) -> Vec<&ResourceEdge> {
        self.graph
            .edge_indices()
            .filter_map(|idx| self.graph.edge_weight(idx))
            .filter(|e| e.is_ownership())
            .collect()
    }

    /// Outgoing reference edges of one node, external refs included.
    pub fn references_from(&self, source_id: &str) -> Vec<&ResourceEdge> {
        let mut refs: Vec<&ResourceEdge> = match self.node_map.get(source_id) {
            Some(&idx) => self
                .graph
                .edges(idx)
                .map(|e| e.weight())
                .filter(|e| !e.is_ownership())
                .collect(),
            None => Vec::new(),
        };
        refs.extend(self.external_refs.iter().filter(|e| e.from == source_id));
        refs
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// The root VPC node of this graph.
    pub fn root(&self) -> Result<&ResourceNode, ModelError> {
        let mut roots = self.nodes().filter(|n| n.kind == ResourceKind::Vpc);
        let root = roots.next().ok_or(ModelError::MissingRoot)?;
        if roots.next().is_some() {
            return Err(ModelError::MultipleRoots);
        }
        Ok(root)
    }

    /// Check the graph invariants: a single VPC root, and exactly one
    /// incoming ownership edge on every other node.
    pub fn validate(&self) -> Result<(), ModelError> {
        let root = self.root()?;

        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            if node.source_id == root.source_id {
                continue;
            }
            let owners = self
                .graph
                .edges_directed(idx, petgraph::Direction::Incoming)
                .filter(|e| e.weight().is_ownership())
                .count();
            if owners != 1 {
                return Err(ModelError::OwnershipViolation {
                    source_id: node.source_id.clone(),
                    owners,
                });
            }
        }

        Ok(())
    }
}

impl PartialEq for TopologyGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes().collect::<Vec<_>>() == other.nodes().collect::<Vec<_>>()
            && self.edges() == other.edges()
    }
}

impl Eq for TopologyGraph {}

/// One capture run: the graphs of every VPC discovered, plus provenance.
///
/// Immutable once written; the restore path only ever reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Wire-schema version, checked on decode
    pub format_version: String,

    /// Capture timestamp, `%Y-%m-%d-%H-%M-%S` in UTC
    pub timestamp: String,

    /// Region the capture ran against
    pub region: String,

    /// One graph per captured VPC, in discovery order
    pub graphs: Vec<TopologyGraph>,
}

/// Summary of a stored snapshot, kept beside the payload so listings do not
/// have to download and decode every document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    /// Snapshot identifier (its timestamp)
    pub timestamp: String,

    /// Region the capture ran against
    pub region: String,

    /// Number of VPC graphs in the snapshot
    pub vpc_count: usize,

    /// Hex SHA-256 of the encoded payload
    pub checksum: String,

    /// Payload size in bytes
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vpc_with_subnet() -> TopologyGraph {
        let mut g = TopologyGraph::new();
        g.add_node(ResourceNode::new(ResourceKind::Vpc, "vpc-1")).unwrap();
        g.add_node(
            ResourceNode::new(ResourceKind::Subnet, "subnet-1")
                .with_attribute("vpcId", json!("vpc-1")),
        )
        .unwrap();
        g.add_edge(ResourceEdge::contains("vpc-1", "subnet-1")).unwrap();
        g
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut g = TopologyGraph::new();
        g.add_node(ResourceNode::new(ResourceKind::Vpc, "vpc-1")).unwrap();
        let err = g.add_node(ResourceNode::new(ResourceKind::Vpc, "vpc-1"));
        assert!(matches!(err, Err(ModelError::DuplicateNode(_))));
    }

    #[test]
    fn test_edge_requires_known_endpoints() {
        let mut g = TopologyGraph::new();
        g.add_node(ResourceNode::new(ResourceKind::Vpc, "vpc-1")).unwrap();
        let err = g.add_edge(ResourceEdge::contains("vpc-1", "subnet-404"));
        assert!(matches!(err, Err(ModelError::NodeNotFound(_))));
    }

    #[test]
    fn test_external_reference_target_may_be_unknown() {
        let mut g = TopologyGraph::new();
        g.add_node(ResourceNode::new(ResourceKind::VpcPeeringConnection, "pcx-1"))
            .unwrap();
        g.add_edge(ResourceEdge::external("pcx-1", "vpc-elsewhere", "accepterVpcId"))
            .unwrap();

        let refs = g.references_from("pcx-1");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].resolution, EdgeResolution::External);
    }

    #[test]
    fn test_validate_accepts_single_owner_forest() {
        let g = vpc_with_subnet();
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_orphan() {
        let mut g = vpc_with_subnet();
        g.add_node(ResourceNode::new(ResourceKind::SecurityGroup, "sg-orphan"))
            .unwrap();
        let err = g.validate();
        assert!(matches!(
            err,
            Err(ModelError::OwnershipViolation { owners: 0, .. })
        ));
    }

    #[test]
    fn test_root_lookup() {
        let g = vpc_with_subnet();
        assert_eq!(g.root().unwrap().source_id, "vpc-1");
    }

    #[test]
    fn test_graph_equality_is_structural() {
        let a = vpc_with_subnet();
        let b = vpc_with_subnet();
        assert_eq!(a, b);
    }
}

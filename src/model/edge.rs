//! Edge types for captured VPC topologies

use serde::{Deserialize, Serialize};

/// How two resources relate inside a topology graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    /// Ownership: the `from` resource owns the `to` resource. Ownership
    /// edges form a forest rooted at the VPC node.
    Contains,

    /// Non-owning pointer: the `from` resource names the `to` resource in
    /// one of its attributes. Reference edges may form cycles.
    References,
}

/// Where a reference edge's target lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeResolution {
    /// Target is a node of the same graph; translated at restore time.
    InGraph,

    /// Target is outside the captured graph (peered VPC, shared gateway).
    /// The id is preserved verbatim and never remapped.
    External,
}

/// A directed edge between two resources, identified by capture-time ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEdge {
    /// Source node's capture-time id
    pub from: String,

    /// Target id; for external references this is an out-of-graph id
    pub to: String,

    /// Ownership or reference
    pub relation: Relation,

    /// Target resolution; ownership edges are always in-graph
    pub resolution: EdgeResolution,

    /// The attribute of `from` that produced this edge, when derived from
    /// an attribute value. Reference-bearing attributes are deferred to the
    /// attach phase by the planner.
    pub via: Option<String>,
}

impl ResourceEdge {
    /// Ownership edge between two in-graph nodes.
    pub fn contains(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation: Relation::Contains,
            resolution: EdgeResolution::InGraph,
            via: None,
        }
    }

    /// Reference edge to another node of the same graph.
    pub fn references(
        from: impl Into<String>,
        to: impl Into<String>,
        via: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation: Relation::References,
            resolution: EdgeResolution::InGraph,
            via: Some(via.into()),
        }
    }

    /// Reference edge to a resource outside the captured graph.
    pub fn external(
        from: impl Into<String>,
        to: impl Into<String>,
        via: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation: Relation::References,
            resolution: EdgeResolution::External,
            via: Some(via.into()),
        }
    }

    /// Whether the edge is an ownership edge.
    pub fn is_ownership(&self) -> bool {
        self.relation == Relation::Contains
    }
}

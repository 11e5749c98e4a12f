//! Dependency planner
//!
//! Turns a [`TopologyGraph`] into a deterministic [`RestorePlan`]: a
//! topological ordering of `CreateSkeleton` steps over the ownership
//! forest, followed by `AttachReferences` steps for every node whose
//! attributes point at other resources. Scheduling every skeleton before
//! any attach step is what breaks reference cycles: two security groups
//! that reference each other are both created with empty rule sets first,
//! and by the time either attach step runs, both replacement ids exist.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde_json::Value;
use thiserror::Error;

use crate::model::{ModelError, ResourceEdge, ResourceKind, ResourceNode, TopologyGraph};

/// Errors raised while planning a restore.
#[derive(Error, Debug)]
pub enum PlanError {
    /// The ownership edges contain a cycle. Ownership is a forest by
    /// construction, so this is a graph-model bug, never retried.
    #[error("Cyclic ownership among resources: {0:?}")]
    CyclicOwnership(Vec<String>),

    /// The graph failed its own invariant checks
    #[error("Graph invariant violation: {0}")]
    Model(#[from] ModelError),
}

/// Create a resource with only its reference-free attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonStep {
    /// Resource kind
    pub kind: ResourceKind,
    /// Capture-time identity
    pub source_id: String,
    /// Structural attributes, safe before any sibling exists
    pub attributes: BTreeMap<String, Value>,
    /// Tags to replay onto the new resource
    pub tags: BTreeMap<String, String>,
}

/// Patch reference-bearing attributes once every target has been created.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachStep {
    /// Resource kind
    pub kind: ResourceKind,
    /// Capture-time identity
    pub source_id: String,
    /// Deferred attributes whose values name other resources
    pub attributes: BTreeMap<String, Value>,
    /// The reference edges those attributes produced
    pub edges: Vec<ResourceEdge>,
}

/// One step of a restore plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Phase one: create with structural attributes only
    CreateSkeleton(SkeletonStep),
    /// Phase two: patch in reference-bearing attributes
    AttachReferences(AttachStep),
}

impl Step {
    /// The capture-time id this step operates on.
    pub fn source_id(&self) -> &str {
        match self {
            Step::CreateSkeleton(s) => &s.source_id,
            Step::AttachReferences(s) => &s.source_id,
        }
    }

    /// The resource kind this step operates on.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Step::CreateSkeleton(s) => s.kind,
            Step::AttachReferences(s) => s.kind,
        }
    }

    /// Whether this is a phase-one creation step.
    pub fn is_skeleton(&self) -> bool {
        matches!(self, Step::CreateSkeleton(_))
    }
}

/// Why the planner left a captured resource out of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The target environment creates this resource itself (default
    /// security group, implicit local route)
    EnvironmentManaged,
    /// Owned by a resource that was itself skipped
    OwnerSkipped,
}

/// A captured resource the plan deliberately does not re-create.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedResource {
    /// Resource kind
    pub kind: ResourceKind,
    /// Capture-time identity
    pub source_id: String,
    /// Why it was skipped
    pub reason: SkipReason,
}

/// A deterministic, dependency-ordered restore plan for one VPC graph.
///
/// `tiers` groups step indices by scheduling constraint: steps inside a
/// tier have no dependency on each other and may run concurrently; tiers
/// run strictly in order. The last tier holds every attach step.
#[derive(Debug, Clone, PartialEq)]
pub struct RestorePlan {
    /// Capture-time id of the graph's root VPC
    pub vpc_source_id: String,
    /// All steps, in execution order
    pub steps: Vec<Step>,
    /// Indices into `steps`, grouped by concurrency tier
    pub tiers: Vec<Vec<usize>>,
    /// Resources deliberately left out
    pub skipped: Vec<SkippedResource>,
}

impl RestorePlan {
    /// Index of the step operating on a given source id, per phase.
    pub fn step_index(&self, source_id: &str, skeleton: bool) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.source_id() == source_id && s.is_skeleton() == skeleton)
    }
}

/// Compute the restore plan for one topology graph.
///
/// Ties among independent nodes at the same ownership depth are broken by
/// capture-time id, so the same graph always yields the same plan.
pub fn plan(graph: &TopologyGraph) -> Result<RestorePlan, PlanError> {
    graph.validate()?;
    let root = graph.root()?;

    let skipped = collect_skipped(graph);
    let skipped_ids: HashSet<&str> = skipped.iter().map(|s| s.source_id.as_str()).collect();

    // Kahn's algorithm over ownership edges only, level by level.
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for node in graph.nodes() {
        if !skipped_ids.contains(node.source_id.as_str()) {
            in_degree.insert(&node.source_id, 0);
        }
    }
    for edge in graph.ownership_edges() {
        if skipped_ids.contains(edge.from.as_str()) || skipped_ids.contains(edge.to.as_str()) {
            continue;
        }
        children.entry(&edge.from).or_default().push(&edge.to);
        *in_degree.entry(&edge.to).or_default() += 1;
    }

    let mut ready: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut steps: Vec<Step> = Vec::new();
    let mut tiers: Vec<Vec<usize>> = Vec::new();
    let mut ordered_nodes: Vec<&ResourceNode> = Vec::new();

    while !ready.is_empty() {
        let mut level: Vec<&str> = ready.drain(..).collect();
        level.sort_unstable();

        let mut tier = Vec::with_capacity(level.len());
        let mut next: Vec<&str> = Vec::new();
        for id in level {
            let node = graph
                .node(id)
                .ok_or_else(|| ModelError::NodeNotFound(id.to_string()))?;
            tier.push(steps.len());
            steps.push(Step::CreateSkeleton(skeleton_step(graph, node)));
            ordered_nodes.push(node);

            for &child in children.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                let degree = in_degree
                    .get_mut(child)
                    .ok_or_else(|| ModelError::NodeNotFound(child.to_string()))?;
                *degree -= 1;
                if *degree == 0 {
                    next.push(child);
                }
            }
        }
        tiers.push(tier);
        next.sort_unstable();
        ready.extend(next);
    }

    if steps.len() + skipped.len() != graph.node_count() {
        let remaining: Vec<String> = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(id, _)| (*id).to_string())
            .collect();
        return Err(PlanError::CyclicOwnership(remaining));
    }

    // Phase two: one attach step per node with outgoing references, all
    // scheduled after every skeleton of the graph.
    let mut attach_tier = Vec::new();
    for node in ordered_nodes {
        let edges: Vec<ResourceEdge> = graph
            .references_from(&node.source_id)
            .into_iter()
            .cloned()
            .collect();
        if edges.is_empty() {
            continue;
        }
        let referential_keys: HashSet<&str> = edges
            .iter()
            .filter_map(|e| e.via.as_deref())
            .collect();
        let attributes: BTreeMap<String, Value> = node
            .attributes
            .iter()
            .filter(|(k, _)| referential_keys.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        attach_tier.push(steps.len());
        steps.push(Step::AttachReferences(AttachStep {
            kind: node.kind,
            source_id: node.source_id.clone(),
            attributes,
            edges,
        }));
    }
    if !attach_tier.is_empty() {
        tiers.push(attach_tier);
    }

    Ok(RestorePlan {
        vpc_source_id: root.source_id.clone(),
        steps,
        tiers,
        skipped,
    })
}

/// Structural attributes: everything not deferred to the attach phase.
fn skeleton_step(graph: &TopologyGraph, node: &ResourceNode) -> SkeletonStep {
    let referential_keys: HashSet<String> = graph
        .references_from(&node.source_id)
        .into_iter()
        .filter_map(|e| e.via.clone())
        .collect();

    let attributes = node
        .attributes
        .iter()
        .filter(|(k, _)| !referential_keys.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    SkeletonStep {
        kind: node.kind,
        source_id: node.source_id.clone(),
        attributes,
        tags: node.tags.clone(),
    }
}

/// Environment-managed nodes plus everything they own, transitively.
fn collect_skipped(graph: &TopologyGraph) -> Vec<SkippedResource> {
    let mut skipped: Vec<SkippedResource> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, SkipReason)> = graph
        .nodes()
        .filter(|n| n.is_environment_managed())
        .map(|n| (n.source_id.clone(), SkipReason::EnvironmentManaged))
        .collect();

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in graph.ownership_edges() {
        children.entry(&edge.from).or_default().push(&edge.to);
    }

    while let Some((id, reason)) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(node) = graph.node(&id) {
            skipped.push(SkippedResource {
                kind: node.kind,
                source_id: id.clone(),
                reason,
            });
        }
        for child in children.get(id.as_str()).map(Vec::as_slice).unwrap_or(&[]) {
            queue.push_back(((*child).to_string(), SkipReason::OwnerSkipped));
        }
    }

    skipped.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    skipped
}

// Integration tests for the dependency planner
// Exercises topological ordering, cycle breaking, and determinism

use serde_json::json;
use vpchron::model::{ResourceEdge, ResourceKind, ResourceNode, TopologyGraph};
use vpchron::planner::{plan, PlanError, Step};

/// The canonical cyclic-reference topology: one VPC, one subnet, two
/// security groups whose rules reference each other.
fn mutual_reference_graph() -> TopologyGraph {
    let mut g = TopologyGraph::new();
    g.add_node(
        ResourceNode::new(ResourceKind::Vpc, "vpc-1")
            .with_attribute("cidrBlock", json!("10.0.0.0/16")),
    )
    .unwrap();
    g.add_node(
        ResourceNode::new(ResourceKind::Subnet, "subnet-1")
            .with_attribute("vpcId", json!("vpc-1"))
            .with_attribute("cidrBlock", json!("10.0.1.0/24")),
    )
    .unwrap();
    for sg in ["sg-1", "sg-2"] {
        g.add_node(
            ResourceNode::new(ResourceKind::SecurityGroup, sg)
                .with_attribute("vpcId", json!("vpc-1"))
                .with_attribute("groupName", json!(sg)),
        )
        .unwrap();
        g.add_edge(ResourceEdge::contains("vpc-1", sg)).unwrap();
    }
    g.add_edge(ResourceEdge::contains("vpc-1", "subnet-1")).unwrap();

    g.add_node(
        ResourceNode::new(ResourceKind::SecurityGroupRule, "sgr-1")
            .with_attribute("groupId", json!("sg-1"))
            .with_attribute("peerGroupId", json!("sg-2")),
    )
    .unwrap();
    g.add_node(
        ResourceNode::new(ResourceKind::SecurityGroupRule, "sgr-2")
            .with_attribute("groupId", json!("sg-2"))
            .with_attribute("peerGroupId", json!("sg-1")),
    )
    .unwrap();
    g.add_edge(ResourceEdge::contains("sg-1", "sgr-1")).unwrap();
    g.add_edge(ResourceEdge::contains("sg-2", "sgr-2")).unwrap();
    g.add_edge(ResourceEdge::references("sgr-1", "sg-2", "peerGroupId"))
        .unwrap();
    g.add_edge(ResourceEdge::references("sgr-2", "sg-1", "peerGroupId"))
        .unwrap();

    g
}

#[test]
fn test_every_owner_precedes_what_it_owns() {
    let graph = mutual_reference_graph();
    let plan = plan(&graph).unwrap();

    for edge in graph.ownership_edges() {
        let owner = plan.step_index(&edge.from, true).unwrap();
        let owned = plan.step_index(&edge.to, true).unwrap();
        assert!(
            owner < owned,
            "{} must be created before {}",
            edge.from,
            edge.to
        );
    }
}

#[test]
fn test_cyclic_references_plan_successfully() {
    let graph = mutual_reference_graph();
    let plan = plan(&graph).unwrap();

    // both groups and both rules get skeletons before either attach step
    let last_skeleton = plan.steps.iter().rposition(Step::is_skeleton).unwrap();
    let first_attach = plan.steps.iter().position(|s| !s.is_skeleton()).unwrap();
    assert!(last_skeleton < first_attach);

    // both rule nodes carry their peer reference into the attach phase
    for (rule, peer) in [("sgr-1", "sg-2"), ("sgr-2", "sg-1")] {
        let idx = plan.step_index(rule, false).unwrap();
        match &plan.steps[idx] {
            Step::AttachReferences(attach) => {
                assert_eq!(attach.attributes["peerGroupId"], json!(peer));
                assert!(attach.edges.iter().any(|e| e.to == peer));
            }
            Step::CreateSkeleton(_) => panic!("expected attach step for {}", rule),
        }
    }
}

#[test]
fn test_canonical_scenario_step_ordering() {
    let graph = mutual_reference_graph();
    let plan = plan(&graph).unwrap();

    let vpc = plan.step_index("vpc-1", true).unwrap();
    let subnet = plan.step_index("subnet-1", true).unwrap();
    let g1 = plan.step_index("sg-1", true).unwrap();
    let g2 = plan.step_index("sg-2", true).unwrap();
    let attach_1 = plan.step_index("sgr-1", false).unwrap();
    let attach_2 = plan.step_index("sgr-2", false).unwrap();

    // the VPC comes first; subnet and groups may order freely among
    // themselves but all precede both attach steps
    assert_eq!(vpc, 0);
    for skeleton in [subnet, g1, g2] {
        assert!(skeleton < attach_1);
        assert!(skeleton < attach_2);
    }
}

#[test]
fn test_skeleton_attributes_omit_deferred_references() {
    let graph = mutual_reference_graph();
    let plan = plan(&graph).unwrap();

    let idx = plan.step_index("sgr-1", true).unwrap();
    match &plan.steps[idx] {
        Step::CreateSkeleton(skeleton) => {
            assert!(skeleton.attributes.contains_key("groupId"));
            assert!(!skeleton.attributes.contains_key("peerGroupId"));
        }
        Step::AttachReferences(_) => panic!("expected skeleton step"),
    }
}

#[test]
fn test_plans_are_reproducible() {
    let graph = mutual_reference_graph();
    let first = plan(&graph).unwrap();
    let second = plan(&graph).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_ownership_cycle_is_fatal() {
    let mut g = TopologyGraph::new();
    g.add_node(ResourceNode::new(ResourceKind::Vpc, "vpc-1")).unwrap();
    g.add_node(ResourceNode::new(ResourceKind::NetworkAcl, "acl-a")).unwrap();
    g.add_node(ResourceNode::new(ResourceKind::NetworkAcl, "acl-b")).unwrap();
    g.add_edge(ResourceEdge::contains("acl-a", "acl-b")).unwrap();
    g.add_edge(ResourceEdge::contains("acl-b", "acl-a")).unwrap();

    let err = plan(&g).unwrap_err();
    match err {
        PlanError::CyclicOwnership(members) => {
            assert!(members.contains(&"acl-a".to_string()));
            assert!(members.contains(&"acl-b".to_string()));
        }
        other => panic!("expected CyclicOwnership, got {:?}", other),
    }
}

#[test]
fn test_external_references_survive_into_attach_steps() {
    let mut g = TopologyGraph::new();
    g.add_node(ResourceNode::new(ResourceKind::Vpc, "vpc-1")).unwrap();
    g.add_node(
        ResourceNode::new(ResourceKind::VpcPeeringConnection, "pcx-1")
            .with_attribute("vpcId", json!("vpc-1"))
            .with_attribute("accepterVpcId", json!("vpc-peer-account")),
    )
    .unwrap();
    g.add_edge(ResourceEdge::contains("vpc-1", "pcx-1")).unwrap();
    g.add_edge(ResourceEdge::external("pcx-1", "vpc-peer-account", "accepterVpcId"))
        .unwrap();

    let plan = plan(&g).unwrap();
    let idx = plan.step_index("pcx-1", false).unwrap();
    match &plan.steps[idx] {
        Step::AttachReferences(attach) => {
            // passed through verbatim, never remapped
            assert_eq!(attach.attributes["accepterVpcId"], json!("vpc-peer-account"));
        }
        Step::CreateSkeleton(_) => panic!("expected attach step"),
    }
}

#[test]
fn test_tiers_partition_all_steps() {
    let graph = mutual_reference_graph();
    let plan = plan(&graph).unwrap();

    let mut seen: Vec<usize> = plan.tiers.iter().flatten().copied().collect();
    seen.sort_unstable();
    let expected: Vec<usize> = (0..plan.steps.len()).collect();
    assert_eq!(seen, expected);
}

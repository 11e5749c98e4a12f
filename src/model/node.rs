//! Resource node types for captured VPC topologies

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of resource kinds a topology capture may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Top-level virtual network container
    Vpc,
    /// Subnet inside a VPC
    Subnet,
    /// Route table owned by a VPC
    RouteTable,
    /// Single route inside a route table
    Route,
    /// Internet gateway attached to a VPC
    InternetGateway,
    /// NAT gateway placed in a subnet
    NatGateway,
    /// Security group owned by a VPC
    SecurityGroup,
    /// Single ingress/egress rule of a security group
    SecurityGroupRule,
    /// Network ACL owned by a VPC
    NetworkAcl,
    /// Single numbered entry of a network ACL
    NetworkAclEntry,
    /// Peering connection between two VPCs
    VpcPeeringConnection,
}

impl ResourceKind {
    /// All kinds, in capture-enumeration order (owners before owned).
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Vpc,
        ResourceKind::Subnet,
        ResourceKind::RouteTable,
        ResourceKind::Route,
        ResourceKind::InternetGateway,
        ResourceKind::NatGateway,
        ResourceKind::SecurityGroup,
        ResourceKind::SecurityGroupRule,
        ResourceKind::NetworkAcl,
        ResourceKind::NetworkAclEntry,
        ResourceKind::VpcPeeringConnection,
    ];

    /// The attribute key naming this kind's owner, if any.
    ///
    /// The root VPC node has no owner; everything else carries exactly one
    /// parent-id attribute from which the `contains` edge is derived.
    pub fn parent_attribute(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Vpc => None,
            ResourceKind::Subnet
            | ResourceKind::RouteTable
            | ResourceKind::InternetGateway
            | ResourceKind::SecurityGroup
            | ResourceKind::NetworkAcl
            | ResourceKind::VpcPeeringConnection => Some("vpcId"),
            ResourceKind::Route => Some("routeTableId"),
            ResourceKind::NatGateway => Some("subnetId"),
            ResourceKind::SecurityGroupRule => Some("groupId"),
            ResourceKind::NetworkAclEntry => Some("networkAclId"),
        }
    }

    /// Identifier prefix used by the source environment for this kind.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::RouteTable => "rtb",
            ResourceKind::Route => "route",
            ResourceKind::InternetGateway => "igw",
            ResourceKind::NatGateway => "nat",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::SecurityGroupRule => "sgr",
            ResourceKind::NetworkAcl => "acl",
            ResourceKind::NetworkAclEntry => "aclent",
            ResourceKind::VpcPeeringConnection => "pcx",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Vpc => "Vpc",
            ResourceKind::Subnet => "Subnet",
            ResourceKind::RouteTable => "RouteTable",
            ResourceKind::Route => "Route",
            ResourceKind::InternetGateway => "InternetGateway",
            ResourceKind::NatGateway => "NatGateway",
            ResourceKind::SecurityGroup => "SecurityGroup",
            ResourceKind::SecurityGroupRule => "SecurityGroupRule",
            ResourceKind::NetworkAcl => "NetworkAcl",
            ResourceKind::NetworkAclEntry => "NetworkAclEntry",
            ResourceKind::VpcPeeringConnection => "VpcPeeringConnection",
        };
        write!(f, "{}", name)
    }
}

/// One captured resource.
///
/// `source_id` is the identity assigned by the environment the backup was
/// taken from. It is opaque and never reused at restore time; the executor
/// maps it to a freshly assigned id through the remap table.
///
/// Attributes and tags use `BTreeMap` so every encoding of a node comes out
/// with sorted keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNode {
    /// Resource kind
    pub kind: ResourceKind,

    /// Capture-time identity
    pub source_id: String,

    /// Describable configuration of the resource
    pub attributes: BTreeMap<String, Value>,

    /// Key/value tags carried by the resource
    pub tags: BTreeMap<String, String>,
}

impl ResourceNode {
    /// Create a node with empty attributes and tags.
    pub fn new(kind: ResourceKind, source_id: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Set an attribute, consuming and returning the node.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Set a tag, consuming and returning the node.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// The owner id named by this node's parent attribute, if present.
    pub fn parent_id(&self) -> Option<&str> {
        let key = self.kind.parent_attribute()?;
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Whether the target environment creates this resource on its own.
    ///
    /// The default security group and the implicit `local` route exist in
    /// every VPC; re-creating them is rejected by the control plane.
    pub fn is_environment_managed(&self) -> bool {
        match self.kind {
            ResourceKind::SecurityGroup => self
                .attributes
                .get("groupName")
                .and_then(Value::as_str)
                .map(|name| name == "default")
                .unwrap_or(false),
            ResourceKind::Route => self
                .attributes
                .get("gatewayId")
                .and_then(Value::as_str)
                .map(|gw| gw == "local")
                .unwrap_or(false),
            _ => false,
        }
    }
}

//! Snapshot wire codec
//!
//! Serializes a [`Snapshot`] to a versioned JSON document and back. The
//! encoding is meant to be read by humans diffing two backups: keys come
//! out sorted (the model stores attributes and tags in `BTreeMap`s) and
//! field order is fixed, so `decode(encode(s)) == s` holds structurally
//! with node order inside each graph preserved.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ModelError, ResourceEdge, ResourceNode, Snapshot, TopologyGraph};

/// The wire-schema version this build writes and accepts.
pub const FORMAT_VERSION: &str = "1.0";

/// Errors raised while encoding or decoding snapshots.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The document declares a schema version this build does not know
    #[error("Unsupported snapshot format version: {0}")]
    UnsupportedFormat(String),

    /// The document is not a well-formed snapshot
    #[error("Malformed snapshot document: {0}")]
    Malformed(String),

    /// The document decoded but violates a graph invariant
    #[error("Snapshot violates graph model: {0}")]
    Model(#[from] ModelError),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDoc {
    format_version: String,
    timestamp: String,
    region: String,
    graphs: Vec<GraphDoc>,
}

#[derive(Serialize, Deserialize)]
struct GraphDoc {
    nodes: Vec<ResourceNode>,
    edges: Vec<ResourceEdge>,
}

/// Encode a snapshot to pretty-printed JSON bytes.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, CodecError> {
    let doc = SnapshotDoc {
        format_version: snapshot.format_version.clone(),
        timestamp: snapshot.timestamp.clone(),
        region: snapshot.region.clone(),
        graphs: snapshot
            .graphs
            .iter()
            .map(|g| GraphDoc {
                nodes: g.nodes().cloned().collect(),
                edges: g.edges().into_iter().cloned().collect(),
            })
            .collect(),
    };
    let mut bytes =
        serde_json::to_vec_pretty(&doc).map_err(|e| CodecError::Malformed(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode snapshot bytes.
///
/// The version gate runs before any structural decoding: an unknown
/// `formatVersion` fails outright rather than producing a partial
/// snapshot.
pub fn decode(bytes: &[u8]) -> Result<Snapshot, CodecError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let version = value
        .get("formatVersion")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CodecError::Malformed("missing formatVersion".to_string()))?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedFormat(version.to_string()));
    }

    let doc: SnapshotDoc =
        serde_json::from_value(value).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let mut graphs = Vec::with_capacity(doc.graphs.len());
    for graph_doc in doc.graphs {
        let mut graph = TopologyGraph::new();
        for node in graph_doc.nodes {
            graph.add_node(node)?;
        }
        for edge in graph_doc.edges {
            graph.add_edge(edge)?;
        }
        graphs.push(graph);
    }

    Ok(Snapshot {
        format_version: doc.format_version,
        timestamp: doc.timestamp,
        region: doc.region,
        graphs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceEdge, ResourceKind, ResourceNode};
    use serde_json::json;

    fn sample_snapshot() -> Snapshot {
        let mut graph = TopologyGraph::new();
        graph
            .add_node(
                ResourceNode::new(ResourceKind::Vpc, "vpc-1")
                    .with_attribute("cidrBlock", json!("10.0.0.0/16"))
                    .with_tag("Name", "prod"),
            )
            .unwrap();
        graph
            .add_node(
                ResourceNode::new(ResourceKind::Subnet, "subnet-1")
                    .with_attribute("vpcId", json!("vpc-1"))
                    .with_attribute("cidrBlock", json!("10.0.1.0/24")),
            )
            .unwrap();
        graph
            .add_edge(ResourceEdge::contains("vpc-1", "subnet-1"))
            .unwrap();
        graph
            .add_edge(ResourceEdge::external("vpc-1", "pcx-elsewhere", "peeringId"))
            .unwrap();

        Snapshot {
            format_version: FORMAT_VERSION.to_string(),
            timestamp: "2024-03-01-12-00-00".to_string(),
            region: "us-east-1".to_string(),
            graphs: vec![graph],
        }
    }

    #[test]
    fn test_round_trip() {
        let snapshot = sample_snapshot();
        let bytes = encode(&snapshot).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let snapshot = sample_snapshot();
        let text = String::from_utf8(encode(&snapshot).unwrap()).unwrap();
        let bumped = text.replace("\"formatVersion\": \"1.0\"", "\"formatVersion\": \"99.0\"");

        let err = decode(bumped.as_bytes()).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedFormat(v) if v == "99.0"));
    }

    #[test]
    fn test_garbage_rejected() {
        let err = decode(b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_encoding_is_stable() {
        let snapshot = sample_snapshot();
        assert_eq!(encode(&snapshot).unwrap(), encode(&snapshot).unwrap());
    }
}

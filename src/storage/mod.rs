//! Snapshot storage collaborators
//!
//! The engine persists snapshots through the minimal capability set of
//! [`SnapshotStore`]: put, get, list. Keys embed the capture timestamp in
//! fixed-width form, so "most recent" is the lexicographic maximum and
//! "by timestamp" is plain prefix assembly.

mod file;
mod memory;
#[cfg(feature = "s3")]
mod s3;

pub use file::FileSnapshotStore;
pub use memory::InMemorySnapshotStore;
#[cfg(feature = "s3")]
pub use s3::{S3SnapshotStore, S3StoreConfig};

use async_trait::async_trait;
use thiserror::Error;

/// Default key prefix for snapshot objects.
pub const DEFAULT_PREFIX: &str = "vpc-backups";

/// Payload object name inside a snapshot's key directory.
pub const PAYLOAD_NAME: &str = "vpc_config.json";

/// Metadata object name inside a snapshot's key directory.
pub const METADATA_NAME: &str = "metadata.json";

/// Errors raised by a snapshot store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The key does not exist
    #[error("Snapshot object not found: {0}")]
    NotFound(String),

    /// The backend could not be read or written
    #[error("Snapshot storage failure: {0}")]
    Io(String),
}

/// Abstract object storage for snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Write an object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Read an object.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// List keys under a prefix, sorted ascending.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Key of one snapshot's payload object.
pub fn payload_key(prefix: &str, region: &str, timestamp: &str) -> String {
    format!("{}/{}/{}/{}", prefix, region, timestamp, PAYLOAD_NAME)
}

/// Key of one snapshot's metadata object.
pub fn metadata_key(prefix: &str, region: &str, timestamp: &str) -> String {
    format!("{}/{}/{}/{}", prefix, region, timestamp, METADATA_NAME)
}

/// Prefix under which every snapshot of a region lives.
pub fn region_prefix(prefix: &str, region: &str) -> String {
    format!("{}/{}/", prefix, region)
}

/// Extract the timestamp segment from a key under a region prefix.
pub fn timestamp_of_key(prefix: &str, region: &str, key: &str) -> Option<String> {
    let rest = key.strip_prefix(&region_prefix(prefix, region))?;
    let (timestamp, _) = rest.split_once('/')?;
    if timestamp.is_empty() {
        None
    } else {
        Some(timestamp.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let key = payload_key("vpc-backups", "us-east-1", "2024-03-01-12-00-00");
        assert_eq!(
            key,
            "vpc-backups/us-east-1/2024-03-01-12-00-00/vpc_config.json"
        );
    }

    #[test]
    fn test_timestamp_extraction() {
        let key = metadata_key("vpc-backups", "eu-west-1", "2024-03-01-12-00-00");
        assert_eq!(
            timestamp_of_key("vpc-backups", "eu-west-1", &key).as_deref(),
            Some("2024-03-01-12-00-00")
        );
        assert!(timestamp_of_key("vpc-backups", "us-east-1", &key).is_none());
    }

    #[test]
    fn test_fixed_width_timestamps_sort_chronologically() {
        let mut keys = vec![
            payload_key("p", "r", "2024-03-02-08-00-00"),
            payload_key("p", "r", "2024-03-01-12-00-00"),
            payload_key("p", "r", "2024-12-31-23-59-59"),
        ];
        keys.sort();
        assert!(keys[2].contains("2024-12-31-23-59-59"));
    }
}

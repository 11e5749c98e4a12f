//! In-memory control plane for tests and dry runs

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::{ControlPlane, ControlPlaneError, RawResource, VpcScope};
use crate::model::ResourceKind;

#[derive(Debug, Clone)]
struct StoredResource {
    raw: RawResource,
    vpc_id: Option<String>,
}

/// A control plane that lives entirely in memory.
///
/// Hands out fresh identities on create, records every call, and supports
/// scripted failures, which is what the executor and reader test suites
/// are built on.
#[derive(Default)]
pub struct InMemoryControlPlane {
    resources: DashMap<String, StoredResource>,
    id_counter: AtomicU64,
    create_counter: AtomicU64,
    patch_counter: AtomicU64,
    create_log: Mutex<Vec<(ResourceKind, String)>>,
    // scripted failures, keyed by 1-based create call number
    create_failures_at: DashMap<u64, ControlPlaneError>,
    // consumed before any create succeeds
    transient_create_failures: Mutex<Vec<ControlPlaneError>>,
    list_failures: DashMap<ResourceKind, ControlPlaneError>,
    // scripted failures, keyed by 1-based patch call number
    patch_failures_at: DashMap<u64, ControlPlaneError>,
}

impl InMemoryControlPlane {
    /// Create an empty control plane.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pre-existing resource, scoped to a VPC where applicable.
    pub fn seed(&self, vpc_id: Option<&str>, raw: RawResource) {
        self.resources.insert(
            raw.id.clone(),
            StoredResource {
                vpc_id: vpc_id.map(str::to_string),
                raw,
            },
        );
    }

    /// Script a failure for the n-th create call (1-based).
    pub fn fail_create_at(&self, call: u64, error: ControlPlaneError) {
        self.create_failures_at.insert(call, error);
    }

    /// Script transient failures consumed before the next creates succeed.
    pub fn push_transient_create_failures(&self, count: usize) {
        let mut queue = self.transient_create_failures.lock();
        for _ in 0..count {
            queue.push(ControlPlaneError::Transient("rate limited".to_string()));
        }
    }

    /// Script a failure for every listing of one kind.
    pub fn fail_list(&self, kind: ResourceKind, error: ControlPlaneError) {
        self.list_failures.insert(kind, error);
    }

    /// Script a failure for the n-th patch call (1-based).
    pub fn fail_patch_at(&self, call: u64, error: ControlPlaneError) {
        self.patch_failures_at.insert(call, error);
    }

    /// Number of create calls observed, failed attempts included.
    pub fn create_call_count(&self) -> u64 {
        self.create_counter.load(Ordering::SeqCst)
    }

    /// Number of patch calls observed.
    pub fn patch_call_count(&self) -> u64 {
        self.patch_counter.load(Ordering::SeqCst)
    }

    /// Ids created so far for one kind, in creation order.
    pub fn created_ids(&self, kind: ResourceKind) -> Vec<String> {
        self.create_log
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Look up a resource by id.
    pub fn resource(&self, id: &str) -> Option<RawResource> {
        self.resources.get(id).map(|entry| entry.raw.clone())
    }

    fn fresh_id(&self, kind: ResourceKind) -> String {
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{:08x}", kind.id_prefix(), n)
    }

    fn in_scope(&self, stored: &StoredResource, scope: &VpcScope) -> bool {
        match &scope.vpc_id {
            None => true,
            Some(vpc_id) => {
                // a VPC is in its own scope
                stored.raw.id == *vpc_id || stored.vpc_id.as_deref() == Some(vpc_id.as_str())
            }
        }
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn list_resources(
        &self,
        scope: &VpcScope,
        kind: ResourceKind,
    ) -> Result<Vec<RawResource>, ControlPlaneError> {
        if let Some(error) = self.list_failures.get(&kind) {
            return Err(error.clone());
        }

        let mut out: Vec<RawResource> = self
            .resources
            .iter()
            .filter(|entry| entry.raw.kind == kind && self.in_scope(entry.value(), scope))
            .map(|entry| entry.raw.clone())
            .collect();
        // deterministic listing order
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn create_resource(
        &self,
        kind: ResourceKind,
        attributes: BTreeMap<String, Value>,
        tags: BTreeMap<String, String>,
    ) -> Result<String, ControlPlaneError> {
        let call = self.create_counter.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some((_, error)) = self.create_failures_at.remove(&call) {
            return Err(error);
        }
        {
            let mut queue = self.transient_create_failures.lock();
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }

        let id = self.fresh_id(kind);
        let vpc_id = match kind {
            ResourceKind::Vpc => Some(id.clone()),
            _ => attributes
                .get("vpcId")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        self.resources.insert(
            id.clone(),
            StoredResource {
                raw: RawResource {
                    kind,
                    id: id.clone(),
                    attributes,
                    tags,
                },
                vpc_id,
            },
        );
        self.create_log.lock().push((kind, id.clone()));
        Ok(id)
    }

    async fn patch_resource(
        &self,
        kind: ResourceKind,
        id: &str,
        attributes: BTreeMap<String, Value>,
    ) -> Result<(), ControlPlaneError> {
        let call = self.patch_counter.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some((_, error)) = self.patch_failures_at.remove(&call) {
            return Err(error);
        }

        let mut entry = self
            .resources
            .get_mut(id)
            .ok_or_else(|| ControlPlaneError::NotFound(format!("{} {}", kind, id)))?;
        entry.raw.attributes.extend(attributes);
        Ok(())
    }

    async fn find_by_tags(
        &self,
        kind: ResourceKind,
        tags: &BTreeMap<String, String>,
    ) -> Result<Option<RawResource>, ControlPlaneError> {
        let found = self.resources.iter().find(|entry| {
            entry.raw.kind == kind
                && tags
                    .iter()
                    .all(|(k, v)| entry.raw.tags.get(k).map(|t| t == v).unwrap_or(false))
        });
        Ok(found.map(|entry| entry.raw.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(kind: ResourceKind, id: &str) -> RawResource {
        RawResource {
            kind,
            id: id.to_string(),
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_fresh_ids() {
        let plane = InMemoryControlPlane::new();
        let a = plane
            .create_resource(ResourceKind::Subnet, BTreeMap::new(), BTreeMap::new())
            .await
            .unwrap();
        let b = plane
            .create_resource(ResourceKind::Subnet, BTreeMap::new(), BTreeMap::new())
            .await
            .unwrap();

        assert_ne!(a, b);
        assert!(a.starts_with("subnet-"));
        assert_eq!(plane.create_call_count(), 2);
    }

    #[tokio::test]
    async fn test_scoped_listing() {
        let plane = InMemoryControlPlane::new();
        plane.seed(None, raw(ResourceKind::Vpc, "vpc-1"));
        plane.seed(Some("vpc-1"), raw(ResourceKind::Subnet, "subnet-1"));
        plane.seed(Some("vpc-2"), raw(ResourceKind::Subnet, "subnet-2"));

        let subnets = plane
            .list_resources(&VpcScope::vpc("vpc-1"), ResourceKind::Subnet)
            .await
            .unwrap();
        assert_eq!(subnets.len(), 1);
        assert_eq!(subnets[0].id, "subnet-1");
    }

    #[tokio::test]
    async fn test_scripted_create_failure() {
        let plane = InMemoryControlPlane::new();
        plane.fail_create_at(1, ControlPlaneError::Api("boom".to_string()));

        let err = plane
            .create_resource(ResourceKind::Vpc, BTreeMap::new(), BTreeMap::new())
            .await;
        assert!(err.is_err());

        // next call succeeds
        let ok = plane
            .create_resource(ResourceKind::Vpc, BTreeMap::new(), BTreeMap::new())
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_find_by_tags() {
        let plane = InMemoryControlPlane::new();
        let mut tags = BTreeMap::new();
        tags.insert("vpchron:source-id".to_string(), "sg-old".to_string());
        plane
            .create_resource(
                ResourceKind::SecurityGroup,
                BTreeMap::from([("groupName".to_string(), json!("app"))]),
                tags.clone(),
            )
            .await
            .unwrap();

        let found = plane
            .find_by_tags(ResourceKind::SecurityGroup, &tags)
            .await
            .unwrap();
        assert!(found.is_some());

        let mut other = BTreeMap::new();
        other.insert("vpchron:source-id".to_string(), "sg-missing".to_string());
        assert!(plane
            .find_by_tags(ResourceKind::SecurityGroup, &other)
            .await
            .unwrap()
            .is_none());
    }
}

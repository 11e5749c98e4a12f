//! Backup and restore orchestrators
//!
//! Thin sequencing over the other components. Backup wires the topology
//! reader into the codec and the snapshot store, one snapshot per
//! invocation keyed by timestamp. Restore resolves a snapshot identifier
//! (or "latest"), decodes it, and runs planner plus executor per contained
//! graph, with failures in one VPC's graph never blocking the others.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::codec;
use crate::control_plane::ControlPlane;
use crate::executor::{ExecutorConfig, ProgressStore, RestorationExecutor, RestoreReport};
use crate::model::{Snapshot, SnapshotInfo};
use crate::planner;
use crate::reader::{CaptureConfig, TopologyReader};
use crate::storage::{
    metadata_key, payload_key, region_prefix, timestamp_of_key, SnapshotStore, StoreError,
    DEFAULT_PREFIX, METADATA_NAME,
};
use crate::{Result, VpchronError};

/// Which stored snapshot a restore should load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSelector {
    /// The lexicographically greatest timestamp under the region prefix
    Latest,
    /// An exact snapshot timestamp
    At(String),
}

/// What a backup run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupOutcome {
    /// Snapshot identifier (its timestamp)
    pub snapshot_id: String,
    /// Number of VPC graphs captured
    pub vpc_count: usize,
    /// Hex SHA-256 of the stored payload
    pub checksum: String,
}

/// Captures every VPC in scope and persists one snapshot.
pub struct BackupOrchestrator {
    control_plane: Arc<dyn ControlPlane>,
    store: Arc<dyn SnapshotStore>,
    region: String,
    prefix: String,
    capture: CaptureConfig,
}

impl BackupOrchestrator {
    /// Create a backup orchestrator for one region.
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        store: Arc<dyn SnapshotStore>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            control_plane,
            store,
            region: region.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            capture: CaptureConfig::default(),
        }
    }

    /// Override the storage key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Override capture tuning.
    pub fn with_capture_config(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    /// Run one backup. Capture is all-or-nothing per VPC: any enumeration
    /// failure aborts the run and nothing is written.
    #[instrument(skip(self), fields(region = %self.region))]
    pub async fn run(&self) -> Result<BackupOutcome> {
        let reader = TopologyReader::new(self.control_plane.clone(), self.capture.clone());
        let graphs = reader.read_all().await?;
        if graphs.is_empty() {
            warn!("no VPCs in scope; writing an empty snapshot");
        }

        let timestamp = Utc::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        let snapshot = Snapshot {
            format_version: codec::FORMAT_VERSION.to_string(),
            timestamp: timestamp.clone(),
            region: self.region.clone(),
            graphs,
        };

        let bytes = codec::encode(&snapshot)?;
        let checksum = sha256_hex(&bytes);
        let info = SnapshotInfo {
            timestamp: timestamp.clone(),
            region: self.region.clone(),
            vpc_count: snapshot.graphs.len(),
            checksum: checksum.clone(),
            size_bytes: bytes.len() as u64,
        };
        let info_bytes =
            serde_json::to_vec_pretty(&info).map_err(VpchronError::Serialization)?;

        self.store
            .put(&payload_key(&self.prefix, &self.region, &timestamp), bytes)
            .await?;
        self.store
            .put(
                &metadata_key(&self.prefix, &self.region, &timestamp),
                info_bytes,
            )
            .await?;

        info!(
            snapshot_id = %timestamp,
            vpc_count = info.vpc_count,
            size_bytes = info.size_bytes,
            "snapshot stored"
        );

        Ok(BackupOutcome {
            snapshot_id: timestamp,
            vpc_count: info.vpc_count,
            checksum,
        })
    }
}

/// Restore tuning knobs.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Which snapshot to load
    pub selector: SnapshotSelector,
    /// Restore only the graph whose root VPC had this capture-time id
    pub vpc_id: Option<String>,
    /// Reuse a run id to resume an interrupted restore; fresh runs get a
    /// generated one
    pub run_id: Option<String>,
    /// Executor tuning
    pub executor: ExecutorConfig,
    /// Verify the payload checksum against stored metadata before decoding
    pub verify_checksum: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            selector: SnapshotSelector::Latest,
            vpc_id: None,
            run_id: None,
            executor: ExecutorConfig::default(),
            verify_checksum: true,
        }
    }
}

impl RestoreOptions {
    /// Select a snapshot by timestamp.
    pub fn with_snapshot(mut self, timestamp: impl Into<String>) -> Self {
        self.selector = SnapshotSelector::At(timestamp.into());
        self
    }

    /// Restore only one VPC graph.
    pub fn with_vpc(mut self, vpc_id: impl Into<String>) -> Self {
        self.vpc_id = Some(vpc_id.into());
        self
    }

    /// Resume with an existing run id.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Override executor tuning.
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }
}

/// What a restore run did, graph by graph.
#[derive(Debug)]
pub struct RestoreOutcome {
    /// The run id every created resource was tagged with
    pub run_id: String,
    /// The snapshot that was restored
    pub snapshot_id: String,
    /// One report per VPC graph the executor ran
    pub reports: Vec<RestoreReport>,
    /// Graphs that never reached execution, with the failure message
    pub graph_failures: Vec<(String, String)>,
}

/// Restores snapshots into a control plane.
pub struct RestoreOrchestrator {
    control_plane: Arc<dyn ControlPlane>,
    store: Arc<dyn SnapshotStore>,
    progress: Arc<dyn ProgressStore>,
    region: String,
    prefix: String,
    options: RestoreOptions,
    cancel: Option<watch::Receiver<bool>>,
}

impl RestoreOrchestrator {
    /// Create a restore orchestrator for one region.
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        store: Arc<dyn SnapshotStore>,
        progress: Arc<dyn ProgressStore>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            control_plane,
            store,
            progress,
            region: region.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            options: RestoreOptions::default(),
            cancel: None,
        }
    }

    /// Override the storage key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set restore options.
    pub fn with_options(mut self, options: RestoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a cancellation signal, forwarded to the executor.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run the restore.
    #[instrument(skip(self), fields(region = %self.region))]
    pub async fn run(&self) -> Result<RestoreOutcome> {
        let timestamp = self.resolve_selector().await?;
        let payload = self
            .store
            .get(&payload_key(&self.prefix, &self.region, &timestamp))
            .await?;

        if self.options.verify_checksum {
            self.verify_checksum(&timestamp, &payload).await?;
        }

        let snapshot = codec::decode(&payload)?;
        let run_id = self
            .options
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(snapshot_id = %timestamp, run_id = %run_id, vpc_count = snapshot.graphs.len(), "restoring snapshot");

        let mut reports = Vec::new();
        let mut graph_failures = Vec::new();
        let mut matched = false;

        for graph in &snapshot.graphs {
            let vpc_source_id = match graph.root() {
                Ok(root) => root.source_id.clone(),
                Err(e) => {
                    error!(%e, "snapshot graph has no usable root; skipping");
                    graph_failures.push(("<unknown>".to_string(), e.to_string()));
                    continue;
                }
            };
            if let Some(wanted) = &self.options.vpc_id {
                if *wanted != vpc_source_id {
                    continue;
                }
            }
            matched = true;

            let plan = match planner::plan(graph) {
                Ok(plan) => plan,
                Err(e) => {
                    error!(vpc = %vpc_source_id, %e, "planning failed; other graphs continue");
                    graph_failures.push((vpc_source_id, e.to_string()));
                    continue;
                }
            };

            let mut executor = RestorationExecutor::new(self.options.executor.clone());
            if let Some(cancel) = &self.cancel {
                executor = executor.with_cancellation(cancel.clone());
            }

            match executor
                .execute(&plan, self.control_plane.clone(), self.progress.clone(), &run_id)
                .await
            {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(vpc = %vpc_source_id, %e, "execution aborted; other graphs continue");
                    graph_failures.push((vpc_source_id, e.to_string()));
                }
            }
        }

        if let Some(wanted) = &self.options.vpc_id {
            if !matched {
                return Err(VpchronError::VpcNotInSnapshot(wanted.clone()));
            }
        }

        Ok(RestoreOutcome {
            run_id,
            snapshot_id: timestamp,
            reports,
            graph_failures,
        })
    }

    /// List available snapshots for this region, newest first.
    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let prefix = region_prefix(&self.prefix, &self.region);
        let keys = self.store.list(&prefix).await?;

        let mut infos = Vec::new();
        for key in keys.iter().filter(|k| k.ends_with(METADATA_NAME)) {
            let bytes = match self.store.get(key).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(%key, %e, "skipping unreadable snapshot metadata");
                    continue;
                }
            };
            match serde_json::from_slice::<SnapshotInfo>(&bytes) {
                Ok(info) => infos.push(info),
                Err(e) => warn!(%key, %e, "skipping malformed snapshot metadata"),
            }
        }

        infos.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(infos)
    }

    async fn resolve_selector(&self) -> Result<String> {
        match &self.options.selector {
            SnapshotSelector::At(timestamp) => Ok(timestamp.clone()),
            SnapshotSelector::Latest => {
                let prefix = region_prefix(&self.prefix, &self.region);
                let keys = self.store.list(&prefix).await?;
                keys.iter()
                    .filter_map(|k| timestamp_of_key(&self.prefix, &self.region, k))
                    .max()
                    .ok_or_else(|| VpchronError::NoSnapshots(prefix))
            }
        }
    }

    async fn verify_checksum(&self, timestamp: &str, payload: &[u8]) -> Result<()> {
        let meta_key = metadata_key(&self.prefix, &self.region, timestamp);
        let info_bytes = match self.store.get(&meta_key).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                warn!(snapshot_id = %timestamp, "no metadata beside snapshot; skipping checksum verification");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let info: SnapshotInfo =
            serde_json::from_slice(&info_bytes).map_err(VpchronError::Serialization)?;

        let actual = sha256_hex(payload);
        if actual != info.checksum {
            return Err(VpchronError::ChecksumMismatch {
                expected: info.checksum,
                actual,
            });
        }
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_is_stable() {
        assert_eq!(sha256_hex(b""), sha256_hex(b""));
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
        assert_eq!(sha256_hex(b"x").len(), 64);
    }
}

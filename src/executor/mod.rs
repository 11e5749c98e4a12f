//! Restoration executor
//!
//! Walks a [`RestorePlan`] against the control-plane collaborator,
//! maintaining the identity remap table and durable per-step progress.
//! Steps inside one tier run concurrently under a bounded worker pool;
//! tiers are separated by a barrier, so every step of tier *k* reaches a
//! terminal state before tier *k+1* dispatches. A fatal step failure
//! aborts the remaining tiers of the same graph only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, instrument, warn};

mod progress;
mod remap;
mod retry;

pub use progress::{InMemoryProgressStore, ProgressError, ProgressStore};
pub use remap::RemapTable;
pub use retry::RetryPolicy;

use crate::control_plane::ControlPlane;
use crate::model::{EdgeResolution, ResourceKind};
use crate::planner::{AttachStep, RestorePlan, SkeletonStep, SkippedResource, Step};

/// Tag recording which restore run created a resource.
pub const RUN_ID_TAG: &str = "vpchron:restore-run-id";

/// Tag recording the capture-time id a resource was restored from.
pub const SOURCE_ID_TAG: &str = "vpchron:source-id";

/// Errors that abort a restore run outright, as opposed to step failures,
/// which are accounted for in the report.
#[derive(Error, Debug)]
pub enum RestoreError {
    /// The progress store could not be read at run start
    #[error("Progress store failure: {0}")]
    Progress(#[from] ProgressError),

    /// A worker task panicked or was torn down
    #[error("Restore worker failure: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Terminal state of one plan step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran and succeeded in this run
    Completed {
        /// Id assigned by the control plane
        new_id: String,
    },
    /// A prior run already completed this step; nothing was re-created
    AlreadyComplete {
        /// Id recorded by the earlier run
        new_id: String,
    },
    /// The step failed after exhausting its retry budget
    Failed {
        /// Terminal error, with context
        error: String,
    },
    /// Never dispatched: an earlier failure or cancellation stopped the run
    NotAttempted,
}

/// Per-step accounting in a [`RestoreReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Capture-time id the step operated on
    pub source_id: String,
    /// Resource kind
    pub kind: ResourceKind,
    /// True for phase-one creation, false for reference attachment
    pub skeleton: bool,
    /// How the step ended
    pub outcome: StepOutcome,
}

/// Full accounting of one VPC graph's restore run: enough to resume an
/// interrupted run or fix the remainder by hand.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreReport {
    /// The restore run id steps were tagged with
    pub run_id: String,
    /// Capture-time id of the graph's root VPC
    pub vpc_source_id: String,
    /// One entry per plan step, in plan order
    pub steps: Vec<StepReport>,
    /// Resources the planner deliberately left out
    pub skipped: Vec<SkippedResource>,
    /// Final state of the identity remap table
    pub remap: HashMap<String, String>,
    /// Whether cancellation stopped dispatch before the plan finished
    pub cancelled: bool,
}

impl RestoreReport {
    /// Whether every step reached a success state.
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| {
            matches!(
                s.outcome,
                StepOutcome::Completed { .. } | StepOutcome::AlreadyComplete { .. }
            )
        })
    }

    /// Steps that failed terminally.
    pub fn failed_steps(&self) -> Vec<&StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
            .collect()
    }

    /// Steps that were never dispatched.
    pub fn unattempted_steps(&self) -> Vec<&StepReport> {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::NotAttempted)
            .collect()
    }

    /// Steps that succeeded, in either this run or a prior one.
    pub fn completed_steps(&self) -> Vec<&StepReport> {
        self.steps
            .iter()
            .filter(|s| {
                matches!(
                    s.outcome,
                    StepOutcome::Completed { .. } | StepOutcome::AlreadyComplete { .. }
                )
            })
            .collect()
    }
}

/// Executor tuning knobs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Worker-pool bound for steps within one tier
    pub concurrency: usize,
    /// Retry policy for control-plane calls
    pub retry: RetryPolicy,
    /// Also probe the control plane by idempotency tags before creating,
    /// in case a prior run died after creating but before recording
    pub probe_control_plane: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            retry: RetryPolicy::default(),
            probe_control_plane: false,
        }
    }
}

impl ExecutorConfig {
    /// Set the worker-pool bound.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable control-plane probing by idempotency tags.
    pub fn with_probe(mut self, probe: bool) -> Self {
        self.probe_control_plane = probe;
        self
    }
}

/// Executes restore plans against a control plane.
pub struct RestorationExecutor {
    config: ExecutorConfig,
    cancel: Option<watch::Receiver<bool>>,
}

impl RestorationExecutor {
    /// Create an executor with the given configuration.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Attach a cancellation signal. When the watched value turns true, no
    /// further steps are dispatched; in-flight steps run to completion.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Execute a plan. Step failures are accounted for in the returned
    /// report; only infrastructure failures (progress store, worker panic)
    /// surface as errors.
    #[instrument(skip(self, plan, control_plane, progress), fields(vpc = %plan.vpc_source_id, run_id = %run_id))]
    pub async fn execute(
        &self,
        plan: &RestorePlan,
        control_plane: Arc<dyn ControlPlane>,
        progress: Arc<dyn ProgressStore>,
        run_id: &str,
    ) -> Result<RestoreReport, RestoreError> {
        let remap = Arc::new(RemapTable::new());

        // Seed the remap table from a prior interrupted run.
        let prior = progress.completed(run_id).await?;
        for (key, new_id) in &prior {
            if let Some(source_id) = key.strip_prefix("create:") {
                remap.insert(source_id, new_id.clone());
            }
        }
        if !prior.is_empty() {
            info!(prior_steps = prior.len(), "resuming restore run");
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut outcomes: Vec<Option<StepOutcome>> = vec![None; plan.steps.len()];
        let mut cancelled = false;
        let mut aborted = false;

        for tier in &plan.tiers {
            if aborted || cancelled {
                break;
            }

            let mut inflight = FuturesUnordered::new();
            for &idx in tier {
                if self.is_cancelled() {
                    warn!("cancellation observed, stopping dispatch");
                    cancelled = true;
                    break;
                }

                let step = plan.steps[idx].clone();
                let ctx = StepContext {
                    control_plane: control_plane.clone(),
                    progress: progress.clone(),
                    remap: remap.clone(),
                    run_id: run_id.to_string(),
                    retry: self.config.retry.clone(),
                    probe: self.config.probe_control_plane,
                };
                let semaphore = semaphore.clone();
                inflight.push(tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return (
                                idx,
                                StepOutcome::Failed {
                                    error: "worker pool closed".to_string(),
                                },
                            )
                        }
                    };
                    let outcome = match step {
                        Step::CreateSkeleton(s) => run_skeleton(&ctx, s).await,
                        Step::AttachReferences(s) => run_attach(&ctx, s).await,
                    };
                    (idx, outcome)
                }));
            }

            // Tier barrier: every dispatched step reaches a terminal state
            // before the next tier starts.
            while let Some(joined) = inflight.next().await {
                let (idx, outcome) = joined?;
                if matches!(outcome, StepOutcome::Failed { .. }) {
                    aborted = true;
                }
                outcomes[idx] = Some(outcome);
            }
        }

        let steps = plan
            .steps
            .iter()
            .zip(outcomes)
            .map(|(step, outcome)| StepReport {
                source_id: step.source_id().to_string(),
                kind: step.kind(),
                skeleton: step.is_skeleton(),
                outcome: outcome.unwrap_or(StepOutcome::NotAttempted),
            })
            .collect();

        Ok(RestoreReport {
            run_id: run_id.to_string(),
            vpc_source_id: plan.vpc_source_id.clone(),
            steps,
            skipped: plan.skipped.clone(),
            remap: remap.to_map(),
            cancelled,
        })
    }
}

#[derive(Clone)]
struct StepContext {
    control_plane: Arc<dyn ControlPlane>,
    progress: Arc<dyn ProgressStore>,
    remap: Arc<RemapTable>,
    run_id: String,
    retry: RetryPolicy,
    probe: bool,
}

fn idempotency_tags(run_id: &str, source_id: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert(RUN_ID_TAG.to_string(), run_id.to_string());
    tags.insert(SOURCE_ID_TAG.to_string(), source_id.to_string());
    tags
}

async fn run_skeleton(ctx: &StepContext, step: SkeletonStep) -> StepOutcome {
    let key = format!("create:{}", step.source_id);

    match ctx.progress.lookup(&ctx.run_id, &key).await {
        Ok(Some(new_id)) => {
            debug!(source_id = %step.source_id, %new_id, "step already recorded, skipping create");
            ctx.remap.insert(&step.source_id, new_id.clone());
            return StepOutcome::AlreadyComplete { new_id };
        }
        Ok(None) => {}
        Err(e) => {
            return StepOutcome::Failed {
                error: format!("progress lookup failed: {}", e),
            }
        }
    }

    let marker = idempotency_tags(&ctx.run_id, &step.source_id);

    if ctx.probe {
        if let Ok(Some(existing)) = ctx.control_plane.find_by_tags(step.kind, &marker).await {
            info!(source_id = %step.source_id, new_id = %existing.id, "found resource from interrupted run");
            ctx.remap.insert(&step.source_id, existing.id.clone());
            if let Err(e) = ctx.progress.record(&ctx.run_id, &key, &existing.id).await {
                return StepOutcome::Failed {
                    error: format!("failed to record progress: {}", e),
                };
            }
            return StepOutcome::AlreadyComplete {
                new_id: existing.id,
            };
        }
    }

    // Provider-reserved tags are never replayed; idempotency markers ride
    // along with whatever the capture carried.
    let mut tags: BTreeMap<String, String> = step
        .tags
        .iter()
        .filter(|(k, _)| !k.starts_with("aws:"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    tags.extend(marker);

    // Structural attributes may name ids created earlier in this run.
    let attributes = ctx.remap.translate_attributes(&step.attributes);

    let created = ctx
        .retry
        .run(|| {
            ctx.control_plane
                .create_resource(step.kind, attributes.clone(), tags.clone())
        })
        .await;

    match created {
        Ok(new_id) => {
            info!(kind = %step.kind, source_id = %step.source_id, %new_id, "created resource");
            ctx.remap.insert(&step.source_id, new_id.clone());
            if let Err(e) = ctx.progress.record(&ctx.run_id, &key, &new_id).await {
                return StepOutcome::Failed {
                    error: format!("created {} but failed to record progress: {}", new_id, e),
                };
            }
            StepOutcome::Completed { new_id }
        }
        Err(e) => {
            error!(kind = %step.kind, source_id = %step.source_id, %e, "skeleton creation failed");
            StepOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}

async fn run_attach(ctx: &StepContext, step: AttachStep) -> StepOutcome {
    let key = format!("attach:{}", step.source_id);

    match ctx.progress.lookup(&ctx.run_id, &key).await {
        Ok(Some(new_id)) => {
            debug!(source_id = %step.source_id, "references already attached, skipping");
            return StepOutcome::AlreadyComplete { new_id };
        }
        Ok(None) => {}
        Err(e) => {
            return StepOutcome::Failed {
                error: format!("progress lookup failed: {}", e),
            }
        }
    }

    let new_id = match ctx.remap.get(&step.source_id) {
        Some(id) => id,
        None => {
            return StepOutcome::Failed {
                error: format!("no remapped id for {}", step.source_id),
            }
        }
    };

    for edge in &step.edges {
        match edge.resolution {
            EdgeResolution::External => {
                debug!(from = %edge.from, to = %edge.to, "external reference passed through verbatim");
            }
            EdgeResolution::InGraph => {
                if ctx.remap.get(&edge.to).is_none() {
                    warn!(
                        from = %edge.from,
                        to = %edge.to,
                        "reference target has no remapped id; attaching capture-time id verbatim"
                    );
                }
            }
        }
    }

    // Mapped targets are translated; external and unresolved ids pass
    // through untouched because the remap table has no entry for them.
    let attributes = ctx.remap.translate_attributes(&step.attributes);

    let patched = ctx
        .retry
        .run(|| {
            ctx.control_plane
                .patch_resource(step.kind, &new_id, attributes.clone())
        })
        .await;

    match patched {
        Ok(()) => {
            info!(kind = %step.kind, source_id = %step.source_id, %new_id, "attached references");
            if let Err(e) = ctx.progress.record(&ctx.run_id, &key, &new_id).await {
                return StepOutcome::Failed {
                    error: format!("attached {} but failed to record progress: {}", new_id, e),
                };
            }
            StepOutcome::Completed { new_id }
        }
        Err(e) => {
            // The skeleton exists; the resource is valid but incomplete.
            error!(kind = %step.kind, source_id = %step.source_id, %new_id, %e, "reference attachment failed");
            StepOutcome::Failed {
                error: format!("resource {} left without references: {}", new_id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::InMemoryControlPlane;
    use crate::model::{ResourceEdge, ResourceKind, ResourceNode, TopologyGraph};
    use crate::planner;
    use serde_json::json;

    fn two_tier_graph() -> TopologyGraph {
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

    #[tokio::test]
    async fn test_structural_parent_id_translated() {
        let graph = two_tier_graph();
        let plan = planner::plan(&graph).unwrap();

        let plane = Arc::new(InMemoryControlPlane::new());
        let progress = Arc::new(InMemoryProgressStore::new());
        let executor = RestorationExecutor::new(ExecutorConfig::default());

        let report = executor
            .execute(&plan, plane.clone(), progress, "run-1")
            .await
            .unwrap();

        assert!(report.is_complete());
        let new_vpc = report.remap["vpc-1"].clone();
        let new_subnet = report.remap["subnet-1"].clone();
        let subnet = plane.resource(&new_subnet).unwrap();
        assert_eq!(subnet.attributes["vpcId"], json!(new_vpc));
    }

    #[tokio::test]
    async fn test_created_resources_carry_idempotency_tags() {
        let graph = two_tier_graph();
        let plan = planner::plan(&graph).unwrap();

        let plane = Arc::new(InMemoryControlPlane::new());
        let progress = Arc::new(InMemoryProgressStore::new());
        let executor = RestorationExecutor::new(ExecutorConfig::default());

        let report = executor
            .execute(&plan, plane.clone(), progress, "run-tags")
            .await
            .unwrap();

        let vpc = plane.resource(&report.remap["vpc-1"]).unwrap();
        assert_eq!(vpc.tags[RUN_ID_TAG], "run-tags");
        assert_eq!(vpc.tags[SOURCE_ID_TAG], "vpc-1");
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch() {
        let graph = two_tier_graph();
        let plan = planner::plan(&graph).unwrap();

        let plane = Arc::new(InMemoryControlPlane::new());
        let progress = Arc::new(InMemoryProgressStore::new());
        let (tx, rx) = watch::channel(true); // cancelled before the run starts
        let executor =
            RestorationExecutor::new(ExecutorConfig::default()).with_cancellation(rx);

        let report = executor
            .execute(&plan, plane.clone(), progress, "run-cancel")
            .await
            .unwrap();
        drop(tx);

        assert!(report.cancelled);
        assert_eq!(report.unattempted_steps().len(), report.steps.len());
        assert_eq!(plane.create_call_count(), 0);
    }
}

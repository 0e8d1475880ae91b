// SPDX-License-Identifier: AGPL-3.0-or-later
//! One reconciliation pass
//!
//! Compares the resource against the last applied snapshot, builds every
//! service pipeline, runs them, and records the new snapshot once the whole
//! pass succeeded. A failed pass leaves the previous snapshot in place so the
//! next pass retries the same changes.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::pipeline::{DeployType, PassReport, PipelineExecutor};
use crate::services::{self, ServiceKind};
use crate::snapshot::{ChangeSet, SnapshotStore, SpecSnapshot};

/// What a pass would do for one service
#[derive(Debug, Clone, Serialize)]
pub struct PlannedPipeline {
    pub service: ServiceKind,
    pub deploy_type: DeployType,
    pub skipped: bool,
    /// Whether the pipeline's condition holds for the detected changes
    pub runs: bool,
    pub steps: Vec<String>,
}

/// Drives passes against one snapshot store
pub struct Reconciler {
    store: Arc<dyn SnapshotStore>,
    executor: PipelineExecutor,
}

impl Reconciler {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            executor: PipelineExecutor::new(),
        }
    }

    /// Changes relative to the last applied snapshot
    pub async fn detect_changes(&self, ctx: &ExecutionContext) -> Result<(SpecSnapshot, ChangeSet)> {
        let previous = self.store.load().await?;
        let snapshot = SpecSnapshot::capture(ctx.spec())?;
        let changes = snapshot.diff(previous.as_ref());
        Ok((snapshot, changes))
    }

    /// Build the pipelines without running any step
    pub async fn plan(&self, ctx: &mut ExecutionContext) -> Result<Vec<PlannedPipeline>> {
        let (_, changes) = self.detect_changes(ctx).await?;
        ctx.set_changes(changes);

        let pipelines = services::build_all(ctx).await;
        Ok(pipelines
            .iter()
            .map(|pipeline| PlannedPipeline {
                service: pipeline.service,
                deploy_type: pipeline.deploy_type,
                skipped: pipeline.skipped,
                runs: pipeline.condition(ctx),
                steps: pipeline
                    .step_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            })
            .collect())
    }

    /// Run a full pass and record the snapshot on success
    pub async fn reconcile(&self, ctx: &mut ExecutionContext) -> Result<PassReport> {
        let (snapshot, changes) = self.detect_changes(ctx).await?;
        if changes.is_empty() {
            info!("No changes since the last applied configuration");
        } else {
            info!(
                common = ?changes.changed_fields,
                services = ?changes.changed_services,
                "Configuration changes detected"
            );
        }
        ctx.set_changes(changes);

        let pipelines = services::build_all(ctx).await;
        let report = self.executor.execute(&pipelines, ctx).await?;

        self.store.save(&snapshot).await?;
        info!(
            duration_ms = report.total_duration_ms,
            "Last applied configuration recorded"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBackend, MemorySnapshotStore};
    use crate::pipeline::PipelineOutcome;
    use crate::resource::{CassandraServices, DataCenter};

    fn resource() -> CassandraServices {
        let mut resource = CassandraServices::default();
        resource.spec.wait_timeout = 300;
        resource.spec.cassandra.secret_name = "cassandra-secret".to_string();
        resource.spec.cassandra.deployment_schema.data_centers = vec![DataCenter {
            name: "dc0".to_string(),
            replicas: 1,
            deploy: true,
        }];
        resource.spec.robot_tests.install = true;
        resource
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let resource = resource();
        let backend = InMemoryBackend::seeded(&resource).await;
        let store = Arc::new(MemorySnapshotStore::new());
        let reconciler = Reconciler::new(store.clone());
        let resource = Arc::new(resource);

        let mut ctx = backend.context(resource.clone(), "cassandra");
        let first = reconciler.reconcile(&mut ctx).await.unwrap();
        assert_eq!(
            first.executed_steps(),
            vec![(ServiceKind::RobotTests, "deployment")]
        );
        assert_eq!(store.saves().await, 1);

        let mut ctx = backend.context(resource, "cassandra");
        let second = reconciler.reconcile(&mut ctx).await.unwrap();
        assert!(second.executed_steps().is_empty());
        assert_eq!(
            second.pipeline(ServiceKind::RobotTests).unwrap().outcome,
            PipelineOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_failed_pass_keeps_previous_snapshot() {
        let mut resource = resource();
        resource.spec.dbaas.install = true;
        resource.spec.dbaas.adapter.secret_name = "dbaas-adapter".to_string();
        resource.spec.vault_registration.enabled = true;
        let backend = InMemoryBackend::seeded(&resource).await;
        backend.vault.fail_moves("sealed").await;

        let store = Arc::new(MemorySnapshotStore::new());
        let reconciler = Reconciler::new(store.clone());
        let mut ctx = backend.context(Arc::new(resource), "cassandra");

        assert!(reconciler.reconcile(&mut ctx).await.is_err());
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn test_plan_runs_nothing() {
        let resource = resource();
        let backend = InMemoryBackend::seeded(&resource).await;
        let reconciler = Reconciler::new(Arc::new(MemorySnapshotStore::new()));
        let mut ctx = backend.context(Arc::new(resource), "cassandra");

        let plan = reconciler.plan(&mut ctx).await.unwrap();

        assert_eq!(plan.len(), 3);
        assert!(plan[0].skipped);
        assert!(plan[2].runs);
        assert_eq!(plan[2].steps, vec!["deployment"]);
        assert!(backend.cluster.actions().await.is_empty());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pipeline executor
//!
//! Runs pipelines in order and their steps in order, halting the pass at the
//! first failing step.

use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info};

use super::{DeployType, Pipeline};
use crate::context::ExecutionContext;
use crate::error::{Result, ServicesError};
use crate::services::ServiceKind;

/// Executor for service pipelines
#[derive(Debug, Default)]
pub struct PipelineExecutor;

/// What happened to a pipeline in a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineOutcome {
    /// Service not installed
    Skipped,
    /// Nothing relevant changed since the last applied snapshot
    Unchanged,
    /// Every step ran or was passed over by its own condition
    Completed,
}

/// Result of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    /// False when the step's condition declined it
    pub ran: bool,
    pub duration_ms: u64,
}

/// Result of one pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub service: ServiceKind,
    pub deploy_type: DeployType,
    pub outcome: PipelineOutcome,
    pub steps: Vec<StepReport>,
}

/// Result of a successful pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub pipelines: Vec<PipelineReport>,
    pub total_duration_ms: u64,
}

impl PassReport {
    pub fn pipeline(&self, service: ServiceKind) -> Option<&PipelineReport> {
        self.pipelines.iter().find(|report| report.service == service)
    }

    /// Names of the steps that actually ran, in execution order
    pub fn executed_steps(&self) -> Vec<(ServiceKind, &str)> {
        self.pipelines
            .iter()
            .flat_map(|report| {
                report
                    .steps
                    .iter()
                    .filter(|step| step.ran)
                    .map(move |step| (report.service, step.name.as_str()))
            })
            .collect()
    }
}

impl PipelineExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run every pipeline whose condition holds
    pub async fn execute(
        &self,
        pipelines: &[Pipeline],
        ctx: &mut ExecutionContext,
    ) -> Result<PassReport> {
        let start_time = Instant::now();
        let mut reports = Vec::with_capacity(pipelines.len());

        info!(pipelines = pipelines.len(), "Starting reconciliation pass");

        for pipeline in pipelines {
            let service = pipeline.service;

            if pipeline.skipped {
                debug!(service = %service, "Service is not installed, skipping");
                reports.push(PipelineReport {
                    service,
                    deploy_type: pipeline.deploy_type,
                    outcome: PipelineOutcome::Skipped,
                    steps: Vec::new(),
                });
                continue;
            }

            if !pipeline.condition(ctx) {
                info!(service = %service, "No changes for service");
                reports.push(PipelineReport {
                    service,
                    deploy_type: pipeline.deploy_type,
                    outcome: PipelineOutcome::Unchanged,
                    steps: Vec::new(),
                });
                continue;
            }

            ctx.set_deploy_type(service, pipeline.deploy_type);
            info!(
                service = %service,
                deploy_type = %pipeline.deploy_type,
                steps = pipeline.steps().len(),
                "Running pipeline"
            );

            let steps = self.execute_pipeline(pipeline, ctx).await?;
            reports.push(PipelineReport {
                service,
                deploy_type: pipeline.deploy_type,
                outcome: PipelineOutcome::Completed,
                steps,
            });
        }

        let total_duration_ms = start_time.elapsed().as_millis() as u64;
        info!(duration_ms = total_duration_ms, "Reconciliation pass completed");

        Ok(PassReport {
            pipelines: reports,
            total_duration_ms,
        })
    }

    async fn execute_pipeline(
        &self,
        pipeline: &Pipeline,
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<StepReport>> {
        let service = pipeline.service;
        let mut reports = Vec::with_capacity(pipeline.steps().len());

        for step in pipeline.steps() {
            let start_time = Instant::now();
            let wrap = |source: ServicesError| ServicesError::StepFailed {
                service: service.name().to_string(),
                step: step.name().to_string(),
                source: Box::new(source),
            };

            if !step.condition(ctx).await.map_err(wrap)? {
                debug!(service = %service, step = step.name(), "Step condition not met");
                reports.push(StepReport {
                    name: step.name().to_string(),
                    ran: false,
                    duration_ms: 0,
                });
                continue;
            }

            debug!(service = %service, step = step.name(), "Executing step");
            if let Err(e) = step.execute(ctx).await {
                error!(service = %service, step = step.name(), error = %e, "Step failed");
                return Err(wrap(e));
            }

            let duration_ms = start_time.elapsed().as_millis() as u64;
            debug!(service = %service, step = step.name(), duration_ms, "Step completed");
            reports.push(StepReport {
                name: step.name().to_string(),
                ran: true,
                duration_ms,
            });
        }

        Ok(reports)
    }
}

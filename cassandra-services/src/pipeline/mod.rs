// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service pipelines
//!
//! A pipeline is the ordered list of steps that brings one supplementary
//! service in line with the resource. Builders in [`crate::services`] decide
//! which steps a pipeline carries; the [`PipelineExecutor`] runs them.

mod executor;

pub use executor::{PassReport, PipelineExecutor, PipelineOutcome, PipelineReport, StepReport};

use serde::Serialize;
use std::fmt;

use crate::cluster::ClusterResult;
use crate::context::ExecutionContext;
use crate::services::ServiceKind;
use crate::step::Step;

/// How a service is being rolled out in this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeployType {
    /// The storage probe failed, so nothing is known about prior state
    Empty,
    /// No prior storage exists
    CleanDeploy,
    /// Prior storage exists
    Update,
}

impl fmt::Display for DeployType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployType::Empty => write!(formatter, "empty"),
            DeployType::CleanDeploy => write!(formatter, "clean-deploy"),
            DeployType::Update => write!(formatter, "update"),
        }
    }
}

/// Classify the result of listing a service's storage claims
pub fn classify_deploy_type(probe: &ClusterResult<Vec<String>>) -> DeployType {
    match probe {
        Err(_) => DeployType::Empty,
        Ok(claims) if claims.is_empty() => DeployType::CleanDeploy,
        Ok(_) => DeployType::Update,
    }
}

/// Ordered steps for one service
pub struct Pipeline {
    pub service: ServiceKind,
    pub deploy_type: DeployType,
    /// Service not installed; the pipeline never runs
    pub skipped: bool,
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new(service: ServiceKind, deploy_type: DeployType) -> Self {
        Self {
            service,
            deploy_type,
            skipped: false,
            steps: Vec::new(),
        }
    }

    /// Pipeline for a service that is not installed
    pub fn skipped(service: ServiceKind) -> Self {
        Self {
            service,
            deploy_type: DeployType::Empty,
            skipped: true,
            steps: Vec::new(),
        }
    }

    pub fn add_step<S: Step + 'static>(&mut self, step: S) {
        self.steps.push(Box::new(step));
    }

    pub fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Run when the service's own section or any common field changed
    pub fn condition(&self, ctx: &ExecutionContext) -> bool {
        !self.skipped && ctx.changes().affects(self.service)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Pipeline")
            .field("service", &self.service)
            .field("deploy_type", &self.deploy_type)
            .field("skipped", &self.skipped)
            .field("steps", &self.step_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;

    #[test]
    fn test_classify_deploy_type() {
        let failed: ClusterResult<Vec<String>> = Err(ClusterError::Api {
            operation: "list claims".to_string(),
            message: "forbidden".to_string(),
        });
        assert_eq!(classify_deploy_type(&failed), DeployType::Empty);
        assert_eq!(classify_deploy_type(&Ok(vec![])), DeployType::CleanDeploy);
        assert_eq!(
            classify_deploy_type(&Ok(vec!["backup-data-0".to_string()])),
            DeployType::Update
        );
    }

    #[test]
    fn test_skipped_pipeline_has_no_steps() {
        let pipeline = Pipeline::skipped(ServiceKind::Dbaas);
        assert!(pipeline.skipped);
        assert!(pipeline.step_names().is_empty());
    }
}

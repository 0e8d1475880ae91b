// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment rollout shared by every service

use std::time::Duration;
use tracing::{debug, info};

use crate::cluster::{labels, DeploymentManifest};
use crate::constants::NAME;
use crate::context::ExecutionContext;
use crate::error::Result;

/// What a rollout waits for once the deployment is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// One ready pod
    PodsReady,
    /// The test run reported completion
    TestsComplete,
}

/// Replace the deployment and wait until it is ready
///
/// The old deployment and its pods are removed first so a changed pod
/// template never runs next to the previous one.
pub async fn roll_out(
    ctx: &ExecutionContext,
    deployment: &DeploymentManifest,
    readiness: Readiness,
) -> Result<()> {
    let cluster = ctx.cluster();
    let namespace = ctx.namespace();
    let timeout = Duration::from_secs(ctx.spec().wait_timeout);

    cluster
        .delete_deployment(namespace, &deployment.name, timeout)
        .await?;
    cluster.apply_deployment(namespace, deployment).await?;
    info!(deployment = %deployment.name, "Deployment applied");

    match readiness {
        Readiness::PodsReady => {
            debug!(deployment = %deployment.name, "Waiting for pods to be ready");
            cluster
                .wait_pods_ready(namespace, &labels([(NAME, deployment.name.as_str())]), 1, timeout)
                .await?;
        }
        Readiness::TestsComplete => {
            debug!(deployment = %deployment.name, "Waiting for tests to complete");
            cluster
                .wait_tests_complete(namespace, &deployment.name, timeout)
                .await?;
        }
    }

    Ok(())
}

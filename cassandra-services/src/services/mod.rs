// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supplementary services and their pipeline builders

pub mod backup;
pub mod dbaas;
pub mod robot_tests;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

use crate::cluster::labels;
use crate::constants::{BACKUP, BACKUP_DAEMON, DBAAS, DBAAS_NAME, NAME, ROBOT};
use crate::context::ExecutionContext;
use crate::pipeline::{classify_deploy_type, DeployType, Pipeline};
use crate::resource::CassandraServicesSpec;

/// A supplementary service managed next to the database
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    Backup,
    Dbaas,
    RobotTests,
}

impl ServiceKind {
    /// Every service, in pipeline order
    pub const ALL: [ServiceKind; 3] = [ServiceKind::Backup, ServiceKind::Dbaas, ServiceKind::RobotTests];

    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::Backup => BACKUP,
            ServiceKind::Dbaas => DBAAS,
            ServiceKind::RobotTests => ROBOT,
        }
    }

    /// Name of the cluster objects the service owns
    pub fn resource_name(&self) -> &'static str {
        match self {
            ServiceKind::Backup => BACKUP_DAEMON,
            ServiceKind::Dbaas => DBAAS_NAME,
            ServiceKind::RobotTests => ROBOT,
        }
    }

    pub fn installed(&self, spec: &CassandraServicesSpec) -> bool {
        match self {
            ServiceKind::Backup => spec.backup_daemon.install,
            ServiceKind::Dbaas => spec.dbaas.install,
            ServiceKind::RobotTests => spec.robot_tests.install,
        }
    }

    /// The service's own section of the resource
    pub fn section(&self, spec: &CassandraServicesSpec) -> serde_json::Result<Value> {
        match self {
            ServiceKind::Backup => serde_json::to_value(&spec.backup_daemon),
            ServiceKind::Dbaas => serde_json::to_value(&spec.dbaas),
            ServiceKind::RobotTests => serde_json::to_value(&spec.robot_tests),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ServiceKind::ALL
            .into_iter()
            .find(|service| service.name() == name || service.resource_name() == name)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.name())
    }
}

/// Probe the service's storage claims to decide how it is rolled out
pub async fn probe_deploy_type(ctx: &ExecutionContext, service: ServiceKind) -> DeployType {
    let selector = labels([(NAME, service.resource_name())]);
    let probe = ctx.cluster().list_claims(ctx.namespace(), &selector).await;
    let deploy_type = classify_deploy_type(&probe);

    match &probe {
        Ok(_) => debug!(service = %service, deploy_type = %deploy_type, "Deploy mode selected"),
        Err(e) => debug!(service = %service, error = %e, "Storage probe failed"),
    }
    deploy_type
}

/// Build the pipeline of every service, in pipeline order
pub async fn build_all(ctx: &ExecutionContext) -> Vec<Pipeline> {
    vec![
        backup::build(ctx).await,
        dbaas::build(ctx).await,
        robot_tests::build(ctx).await,
    ]
}

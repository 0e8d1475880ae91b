// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conformance test runner pipeline

use async_trait::async_trait;
use tracing::debug;

use super::{probe_deploy_type, ServiceKind};
use crate::cluster::{
    tls_client_wiring, vault_wiring, BasicLabels, DeploymentManifest, EnvVar,
};
use crate::constants::{
    http_port, APP, BACKUP_DAEMON, CASSANDRA_CLUSTER, DBAAS_NAME, MICROSERVICE, PASSWORD, ROBOT,
    ROBOT_ENTRYPOINT, ROOT_CERT_PATH, USERNAME,
};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::step::Step;
use crate::steps::{roll_out, Readiness};

/// Build the test runner pipeline, a single deployment step
pub async fn build(ctx: &ExecutionContext) -> Pipeline {
    if !ctx.spec().robot_tests.install {
        debug!(service = %ServiceKind::RobotTests, "Not installed");
        return Pipeline::skipped(ServiceKind::RobotTests);
    }

    let deploy_type = probe_deploy_type(ctx, ServiceKind::RobotTests).await;
    let mut pipeline = Pipeline::new(ServiceKind::RobotTests, deploy_type);
    pipeline.add_step(RobotTestsDeploymentStep);
    pipeline
}

/// Rolls out the test runner and waits for its run to finish
#[derive(Debug, Clone, Default)]
pub struct RobotTestsDeploymentStep;

impl RobotTestsDeploymentStep {
    pub fn manifest(&self, ctx: &ExecutionContext) -> DeploymentManifest {
        let spec = ctx.spec();
        let robot = &spec.robot_tests;
        let namespace = ctx.namespace();

        let mut deployment = DeploymentManifest::new(ROBOT, &robot.docker_image, spec);
        deployment.resources = robot.resources.clone();
        deployment.node_selector = robot.node_labels.clone();
        deployment.args = robot.args.clone();
        deployment.labels.insert(APP.to_string(), CASSANDRA_CLUSTER.to_string());
        deployment.labels.insert(MICROSERVICE.to_string(), ROBOT.to_string());

        let dc_name = spec
            .deployed_data_centers()
            .next()
            .map(|dc| dc.name.clone())
            .unwrap_or_default();

        deployment.env.extend([
            EnvVar::field("NAMESPACE", "metadata.namespace"),
            EnvVar::plain("CASSANDRA_HOST", spec.cassandra_host(namespace)),
            EnvVar::plain("CASSANDRA_PORT", spec.cassandra_port().to_string()),
            EnvVar::secret("CASSANDRA_USERNAME", &spec.cassandra.secret_name, USERNAME),
            EnvVar::secret("CASSANDRA_PASSWORD", &spec.cassandra.secret_name, PASSWORD),
            EnvVar::plain(
                "TEST_KEYSPACES_REPLICATION_FACTOR",
                robot.replication_factor.to_string(),
            ),
            EnvVar::plain("ATTEMPTS_NUMBER", robot.attempts_number.to_string()),
            EnvVar::plain("PROMETHEUS_URL", robot.prometheus_url.clone()),
            EnvVar::plain("TAGS", robot.tags.clone()),
            EnvVar::plain("WAIT_TIMEOUT", spec.wait_timeout.to_string()),
            EnvVar::plain("DC_NAME", dc_name),
            EnvVar::plain("DBAAS_ADAPTER_API_VERSION", spec.dbaas.api_version.clone()),
            EnvVar::plain("PORT", http_port(spec.tls.enabled).to_string()),
            EnvVar::plain("CONFIG_NAME", "cassandra-tests-config"),
            EnvVar::plain("SUPPLEMENTARY_CONFIG_NAME", "supplementary-tests-config"),
            EnvVar::plain(
                "STATUS_CUSTOM_RESOURCE_PATH",
                format!("apps/v1/{}/deployments/{}", namespace, ROBOT),
            ),
            EnvVar::plain("STATUS_WRITING_ENABLED", "true"),
        ]);

        if spec.backup_daemon.install {
            deployment.env.extend([
                EnvVar::plain("BACKUP_HOST", format!("{}.{}.svc", BACKUP_DAEMON, namespace)),
                EnvVar::secret(
                    "BACKUP_DAEMON_API_CREDENTIALS_USERNAME",
                    &spec.backup_daemon.secret_name,
                    USERNAME,
                ),
                EnvVar::secret(
                    "BACKUP_DAEMON_API_CREDENTIALS_PASSWORD",
                    &spec.backup_daemon.secret_name,
                    PASSWORD,
                ),
            ]);
        }

        if spec.dbaas.install {
            deployment.env.extend([
                EnvVar::plain("DBAAS_HOST", format!("{}.{}.svc", DBAAS_NAME, namespace)),
                EnvVar::secret(
                    "DBAAS_ADAPTER_USERNAME",
                    &spec.dbaas.adapter.secret_name,
                    USERNAME,
                ),
                EnvVar::secret(
                    "DBAAS_ADAPTER_PASSWORD",
                    &spec.dbaas.adapter.secret_name,
                    PASSWORD,
                ),
            ]);
        }

        vault_wiring(&mut deployment, &[ROBOT_ENTRYPOINT], &spec.vault_registration);
        tls_client_wiring(&mut deployment, ROOT_CERT_PATH, &spec.tls);

        deployment.apply_labels(
            &BasicLabels {
                app_name: ROBOT,
                component: "operator",
                technology: "python",
            }
            .labels(spec),
        );

        deployment
    }
}

#[async_trait]
impl Step for RobotTestsDeploymentStep {
    fn name(&self) -> &str {
        "deployment"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let deployment = self.manifest(ctx);
        roll_out(ctx, &deployment, Readiness::TestsComplete).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::EnvSource;
    use crate::memory::InMemoryBackend;
    use crate::resource::{CassandraServices, DataCenter};
    use std::sync::Arc;

    fn resource() -> CassandraServices {
        let mut resource = CassandraServices::default();
        resource.spec.cassandra.secret_name = "cassandra-secret".to_string();
        resource.spec.cassandra.deployment_schema.data_centers = vec![
            DataCenter {
                name: "dc-old".to_string(),
                replicas: 3,
                deploy: false,
            },
            DataCenter {
                name: "dc-new".to_string(),
                replicas: 3,
                deploy: true,
            },
        ];
        resource.spec.robot_tests.install = true;
        resource
    }

    #[tokio::test]
    async fn test_pipeline_is_a_single_deployment() {
        let resource = resource();
        let backend = InMemoryBackend::seeded(&resource).await;
        let ctx = backend.context(Arc::new(resource), "cassandra");
        assert_eq!(build(&ctx).await.step_names(), vec!["deployment"]);
    }

    #[tokio::test]
    async fn test_manifest_targets_first_deployed_dc() {
        let resource = resource();
        let backend = InMemoryBackend::seeded(&resource).await;
        let ctx = backend.context(Arc::new(resource), "cassandra");

        let deployment = RobotTestsDeploymentStep.manifest(&ctx);

        assert_eq!(
            deployment.env_value("DC_NAME"),
            Some(&EnvSource::Value("dc-new".to_string()))
        );
        assert!(deployment.env_value("BACKUP_HOST").is_none());
        assert!(deployment.env_value("DBAAS_HOST").is_none());
    }
}

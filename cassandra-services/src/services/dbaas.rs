// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database-as-a-service adapter pipeline

use async_trait::async_trait;
use tracing::debug;

use super::{probe_deploy_type, ServiceKind};
use crate::cluster::{
    tls_client_wiring, tls_server_wiring, vault_wiring, BasicLabels, DeploymentManifest, EnvVar,
};
use crate::constants::{
    http_port, http_protocol, BACKUP_DAEMON, DBAAS, DBAAS_ADMIN_ROLE_CREDS, DBAAS_NAME, NAME,
    PASSWORD, ROLES, ROOT_CERT_PATH, SERVER_CERTS_PATH, USERNAME,
};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::resource::CassandraServicesSpec;
use crate::step::Step;
use crate::steps::{roll_out, Readiness, ServiceStep};
use crate::vault::MoveSecretToVaultStep;

const ADAPTER_ENTRYPOINT: &str = "/usr/local/bin/entrypoint";

/// The adapter serves HTTPS only when TLS is on and the aggregator it
/// registers with is itself reached over HTTPS
pub fn adapter_tls_enabled(spec: &CassandraServicesSpec) -> bool {
    spec.tls.enabled
        && spec
            .dbaas
            .aggregator
            .dbaas_aggregator_registration_address
            .contains("https")
}

fn or_default(value: &Option<String>, default: &str) -> String {
    match value.as_deref() {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => default.to_string(),
    }
}

/// Build the adapter pipeline: service, vault migration, deployment
pub async fn build(ctx: &ExecutionContext) -> Pipeline {
    let spec = ctx.spec();

    if !spec.dbaas.install {
        debug!(service = %ServiceKind::Dbaas, "Not installed");
        return Pipeline::skipped(ServiceKind::Dbaas);
    }

    let deploy_type = probe_deploy_type(ctx, ServiceKind::Dbaas).await;
    let mut pipeline = Pipeline::new(ServiceKind::Dbaas, deploy_type);

    pipeline.add_step(ServiceStep {
        service: ServiceKind::Dbaas,
        technology: "go",
        port: http_port(adapter_tls_enabled(spec)),
    });

    if spec.vault_registration.enabled {
        pipeline.add_step(MoveSecretToVaultStep::new(
            spec.dbaas.adapter.secret_name.clone(),
            DBAAS,
        ));
    }

    pipeline.add_step(DbaasDeploymentStep);
    pipeline
}

/// Rolls out the adapter deployment
#[derive(Debug, Clone, Default)]
pub struct DbaasDeploymentStep;

impl DbaasDeploymentStep {
    pub fn manifest(&self, ctx: &ExecutionContext) -> DeploymentManifest {
        let spec = ctx.spec();
        let dbaas = &spec.dbaas;
        let namespace = ctx.namespace();
        let tls_enabled = adapter_tls_enabled(spec);
        let port = http_port(tls_enabled);

        let mut deployment = DeploymentManifest::new(DBAAS_NAME, &dbaas.docker_image, spec);
        deployment.port = Some(port);
        deployment.resources = dbaas.resources.clone();
        deployment.node_selector = dbaas.node_labels.clone();
        deployment.priority_class_name = dbaas.priority_class_name.clone();

        let physical_id = if dbaas.aggregator.physical_database_identifier.is_empty() {
            namespace.to_string()
        } else {
            dbaas.aggregator.physical_database_identifier.clone()
        };
        let vault = &spec.vault_registration;

        deployment.env.extend([
            EnvVar::field("NAMESPACE", "metadata.namespace"),
            EnvVar::plain("CASSANDRA_HOSTNAME", spec.cassandra_host(namespace)),
            EnvVar::plain("CASSANDRA_PORT", spec.cassandra_port().to_string()),
            EnvVar::secret("CASSANDRA_USERNAME", &spec.cassandra.secret_name, USERNAME),
            EnvVar::secret("CASSANDRA_PASSWORD", &spec.cassandra.secret_name, PASSWORD),
            EnvVar::plain(
                "GOCQL_DEFAULT_KEYSPACE",
                or_default(&spec.cassandra.default_keyspace, "system"),
            ),
            EnvVar::plain(
                "GOCQL_CONSISTENCY",
                or_default(&spec.cassandra.consistency, "QUORUM"),
            ),
            EnvVar::plain("TLS_ENABLED", spec.cassandra.tls.to_string()),
            EnvVar::plain("DBAAS_AGGREGATOR_PHYSICAL_DATABASE_IDENTIFIER", physical_id),
            EnvVar::plain(
                "DBAAS_ADAPTER_ADDRESS",
                format!(
                    "{}://{}.{}:{}",
                    http_protocol(tls_enabled),
                    DBAAS_NAME,
                    namespace,
                    port
                ),
            ),
            EnvVar::plain(
                "DBAAS_AGGREGATOR_REGISTRATION_ADDRESS",
                dbaas.aggregator.dbaas_aggregator_registration_address.clone(),
            ),
            EnvVar::plain("PORT", port.to_string()),
            EnvVar::secret("DBAAS_ADAPTER_USERNAME", &dbaas.adapter.secret_name, USERNAME),
            EnvVar::secret("DBAAS_ADAPTER_PASSWORD", &dbaas.adapter.secret_name, PASSWORD),
            EnvVar::secret(
                "DBAAS_AGGREGATOR_REGISTRATION_USERNAME",
                &dbaas.aggregator.secret_name,
                USERNAME,
            ),
            EnvVar::secret(
                "DBAAS_AGGREGATOR_REGISTRATION_PASSWORD",
                &dbaas.aggregator.secret_name,
                PASSWORD,
            ),
            EnvVar::plain("GOCQL_TIMEOUT", spec.gocql_timeout.to_string()),
            EnvVar::plain("GOCQL_CONNECT_TIMEOUT", spec.gocql_connect_timeout.to_string()),
            EnvVar::plain("VAULT_ENABLED", vault.enabled.to_string()),
            EnvVar::plain("VAULT_AUTH_METHOD", vault.method.clone()),
            EnvVar::plain(
                "VAULT_ENV_PASSTHROUGH",
                "VAULT_ADDR,VAULT_ROLE,VAULT_AUTH_METHOD,VAULT_ENABLED",
            ),
            EnvVar::plain("VAULT_ROTATION_PERIOD", vault.rotation_period.to_string()),
            EnvVar::plain("VAULT_DB_ENGINE_NAME", "cassandra-db-engine"),
            EnvVar::plain("API_VERSION", dbaas.api_version.clone()),
            EnvVar::plain("MULTI_USERS_ENABLED", dbaas.multi_users.to_string()),
            EnvVar::plain("CASSANDRA_DEFAULT_TOPOLOGY", dbaas.topology_strategy.clone()),
            EnvVar::secret("DBAAS_STREAMING_ROLE_NAME", DBAAS_ADMIN_ROLE_CREDS, NAME),
            EnvVar::secret("DBAAS_STREAMING_ROLE_PERMISSIONS", DBAAS_ADMIN_ROLE_CREDS, ROLES),
        ]);

        if spec.backup_daemon.install {
            let backup_tls = spec.tls.enabled;
            deployment.env.extend([
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
                EnvVar::plain(
                    "BACKUP_DAEMON_ADDRESS",
                    format!(
                        "{}://{}:{}",
                        http_protocol(backup_tls),
                        BACKUP_DAEMON,
                        http_port(backup_tls)
                    ),
                ),
            ]);
        }

        vault_wiring(&mut deployment, &[ADAPTER_ENTRYPOINT], vault);
        tls_client_wiring(&mut deployment, ROOT_CERT_PATH, &spec.tls);
        if tls_enabled {
            tls_server_wiring(
                &mut deployment,
                &spec.tls,
                &dbaas.tls.dbaas_adapter_ca_secret_name,
                SERVER_CERTS_PATH,
            );
        }

        deployment.apply_labels(
            &BasicLabels {
                app_name: DBAAS_NAME,
                component: "backend",
                technology: "go",
            }
            .labels(spec),
        );

        deployment
    }
}

#[async_trait]
impl Step for DbaasDeploymentStep {
    fn name(&self) -> &str {
        "deployment"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let deployment = self.manifest(ctx);
        roll_out(ctx, &deployment, Readiness::PodsReady).await
    }
}

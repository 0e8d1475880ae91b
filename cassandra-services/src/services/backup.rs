// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup daemon pipeline

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{probe_deploy_type, ServiceKind};
use crate::cluster::{
    tls_client_wiring, tls_server_wiring, vault_wiring, BasicLabels, DeploymentManifest, EnvVar,
    Volume, VolumeMount, VolumeSource,
};
use crate::constants::{
    http_port, ACCESS_KEY, BACKUP, BACKUP_DAEMON, BACKUP_ENTRYPOINT, BACKUP_STORAGE,
    MAJOR_VERSION_CONFIG, PASSWORD, REGION, ROOT_CERT_PATH, SECRET_KEY, SERVER_CERTS_PATH,
    SSH_PRIVATE_KEY, SSH_SECRET, USERNAME,
};
use crate::context::ExecutionContext;
use crate::credentials::SshKeyBootstrapStep;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::resource::CassandraServicesSpec;
use crate::step::Step;
use crate::steps::{roll_out, CreateStorageClaimsStep, Readiness, ServiceStep, StoreNodesStep};
use crate::vault::MoveSecretToVaultStep;

const S3_CERTS: &str = "s3-ssl-certs";
const S3_CERTS_PATH: &str = "/s3Certs";

/// Build the backup daemon pipeline
///
/// Storage claims, node recording, service, vault migration, SSH key
/// bootstrap, deployment. Storage steps are left out for ephemeral storage,
/// the vault step without vault registration, and the SSH bootstrap in
/// managed keyspaces mode.
pub async fn build(ctx: &ExecutionContext) -> Pipeline {
    let spec = ctx.spec();
    let backup = &spec.backup_daemon;

    if !backup.install {
        debug!(service = %ServiceKind::Backup, "Not installed");
        return Pipeline::skipped(ServiceKind::Backup);
    }

    let deploy_type = probe_deploy_type(ctx, ServiceKind::Backup).await;
    let mut pipeline = Pipeline::new(ServiceKind::Backup, deploy_type);

    if !backup.storage.empty_dir {
        pipeline.add_step(CreateStorageClaimsStep {
            service: ServiceKind::Backup,
            storage: backup.storage.clone(),
            claim_prefix: "backup-data".to_string(),
            count: 1,
            owned_by_resource: spec.delete_pvc_on_uninstall,
            wait_timeout: Duration::from_secs(spec.wait_timeout),
        });
        pipeline.add_step(StoreNodesStep {
            service: ServiceKind::Backup,
            storage: backup.storage.clone(),
        });
    }

    pipeline.add_step(ServiceStep {
        service: ServiceKind::Backup,
        technology: "python",
        port: http_port(spec.tls.enabled),
    });

    if spec.vault_registration.enabled {
        pipeline.add_step(MoveSecretToVaultStep::new(backup.secret_name.clone(), BACKUP));
    }

    if !spec.aws_keyspaces.install {
        pipeline.add_step(SshKeyBootstrapStep::new());
    }

    pipeline.add_step(BackupDeploymentStep);
    pipeline
}

/// Hostnames of every database pod, space separated
fn cassandra_hosts(spec: &CassandraServicesSpec, namespace: &str) -> String {
    let mut hosts = Vec::new();
    for dc in &spec.cassandra.deployment_schema.data_centers {
        for replica in 0..dc.replicas {
            hosts.push(format!(
                "cassandra{}-0.cassandra.{}.svc.cluster.local",
                replica, namespace
            ));
        }
    }
    hosts.join(" ")
}

/// Rolls out the backup daemon deployment
#[derive(Debug, Clone, Default)]
pub struct BackupDeploymentStep;

impl BackupDeploymentStep {
    /// Assemble the deployment from the resource and published storage
    pub async fn manifest(&self, ctx: &ExecutionContext) -> Result<DeploymentManifest> {
        let spec = ctx.spec();
        let backup = &spec.backup_daemon;
        let namespace = ctx.namespace();

        let mut deployment = DeploymentManifest::new(BACKUP_DAEMON, &backup.docker_image, spec);
        deployment.port = Some(http_port(spec.tls.enabled));
        deployment.resources = backup.resources.clone();
        deployment.priority_class_name = backup.priority_class_name.clone();

        if spec.aws_keyspaces.install {
            let secret = &spec.aws_keyspaces.secret_name;
            deployment.env.extend([
                EnvVar::plain("EXTERNAL_RESTORE", "true"),
                EnvVar::plain("AWS_RESTORE", "true"),
                EnvVar::secret("AWS_ACCESS_KEY", secret, ACCESS_KEY),
                EnvVar::secret("AWS_SECRET_KEY", secret, SECRET_KEY),
                EnvVar::secret("AWS_REGION", secret, REGION),
            ]);
        } else {
            let versions = ctx
                .cluster()
                .read_config_map(namespace, MAJOR_VERSION_CONFIG)
                .await?;
            let major_version = versions.get("majorVersion").cloned().unwrap_or_default();

            deployment.env.extend([
                EnvVar::plain("CASSANDRA_HOSTS", cassandra_hosts(spec, namespace)),
                EnvVar::plain("BACKUP_SCHEDULE", backup.backup_schedule.clone()),
                EnvVar::plain("GRANULAR_SCHEDULE", backup.granular_backup_schedule.clone()),
                EnvVar::plain("SCHEDULED_DBS", backup.granular_backup_scheduled_dbs.join(",")),
                EnvVar::plain("EVICTION_POLICY", backup.eviction_policy.clone()),
                EnvVar::plain("GRANULAR_EVICTION_POLICY", backup.granular_eviction_policy.clone()),
                EnvVar::plain("STORAGE", backup.storage_directory.clone()),
                EnvVar::plain("CASSANDRA_MAJOR_VERSION", major_version),
                EnvVar::secret("SSH_PRIVATE_KEY", SSH_SECRET, SSH_PRIVATE_KEY),
                EnvVar::secret("CASSANDRA_USERNAME", &spec.cassandra.secret_name, USERNAME),
                EnvVar::secret("CASSANDRA_PASSWORD", &spec.cassandra.secret_name, PASSWORD),
                EnvVar::secret("BACKUP_DAEMON_API_CREDENTIALS_USERNAME", &backup.secret_name, USERNAME),
                EnvVar::secret("BACKUP_DAEMON_API_CREDENTIALS_PASSWORD", &backup.secret_name, PASSWORD),
                EnvVar::plain("CONNECT_TIMEOUT", spec.gocql_connect_timeout.to_string()),
                EnvVar::plain("REQUEST_TIMEOUT", spec.gocql_timeout.to_string()),
            ]);

            let s3 = &backup.s3;
            if s3.enabled {
                deployment.env.extend([
                    EnvVar::plain("S3_ENABLED", "true"),
                    EnvVar::plain("S3_BUCKET", s3.bucket_name.clone()),
                    EnvVar::plain("S3_URL", s3.endpoint_url.clone()),
                    EnvVar::secret("S3_KEY_ID", &s3.secret_name, USERNAME),
                    EnvVar::secret("S3_KEY_SECRET", &s3.secret_name, PASSWORD),
                ]);
                if s3.ssl_verify {
                    deployment.env.push(EnvVar::plain("S3_CERTS_PATH", S3_CERTS_PATH));
                }
            }
        }

        if spec.ip_v6 {
            deployment.env.push(EnvVar::plain("BROADCAST_ADDRESS", "::"));
        }

        let storage = ctx.storage(ServiceKind::Backup);
        let volume_source = match storage.claims.first() {
            Some(claim) if !backup.storage.empty_dir => VolumeSource::PersistentClaim(claim.clone()),
            _ => VolumeSource::EmptyDir,
        };
        deployment.volumes.push(Volume {
            name: BACKUP_STORAGE.to_string(),
            source: volume_source,
        });
        deployment.mounts.push(VolumeMount {
            name: BACKUP_STORAGE.to_string(),
            mount_path: backup.storage_directory.clone(),
            read_only: false,
        });

        deployment.node_selector = match storage.node_selectors.first() {
            Some(selector) => selector.clone(),
            None => backup.node_labels.clone(),
        };

        if backup.s3.ssl_verify {
            deployment.volumes.push(Volume {
                name: S3_CERTS.to_string(),
                source: VolumeSource::Secret(backup.s3.ssl_secret_name.clone()),
            });
            deployment.mounts.push(VolumeMount {
                name: S3_CERTS.to_string(),
                mount_path: S3_CERTS_PATH.to_string(),
                read_only: true,
            });
        }

        vault_wiring(&mut deployment, &[BACKUP_ENTRYPOINT], &spec.vault_registration);
        tls_client_wiring(&mut deployment, ROOT_CERT_PATH, &spec.tls);
        tls_server_wiring(
            &mut deployment,
            &spec.tls,
            &backup.tls.backup_daemon_ca_secret_name,
            SERVER_CERTS_PATH,
        );

        deployment.apply_labels(
            &BasicLabels {
                app_name: BACKUP_DAEMON,
                component: "backend",
                technology: "python",
            }
            .labels(spec),
        );

        Ok(deployment)
    }
}

#[async_trait]
impl Step for BackupDeploymentStep {
    fn name(&self) -> &str {
        "deployment"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let deployment = self.manifest(ctx).await?;
        roll_out(ctx, &deployment, Readiness::PodsReady).await
    }
}

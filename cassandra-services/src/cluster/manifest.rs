// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster object manifests produced by the pipelines

use serde::Serialize;
use std::collections::BTreeMap;

use super::Labels;
use crate::constants::{
    APP_COMPONENT, APP_INSTANCE, APP_MANAGED_BY, APP_NAME, APP_PART_OF, APP_TECHNOLOGY,
    APP_VERSION, ROOT_CERT,
};
use crate::resource::{
    CassandraServicesSpec, ResourceRequirements, TlsSettings, Toleration, VaultRegistration,
};

/// Persistent volume claim to create or update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimRequest {
    pub name: String,
    pub labels: Labels,
    pub size: Option<String>,
    pub storage_class: Option<String>,
    /// Pre-provisioned volume to bind to
    pub volume: Option<String>,
    /// Claim is removed together with the resource
    pub owned_by_resource: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceManifest {
    pub name: String,
    pub labels: Labels,
    pub selector: Labels,
    pub ports: BTreeMap<String, i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretManifest {
    pub name: String,
    pub labels: Labels,
    pub string_data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EnvSource {
    Value(String),
    SecretKey { secret: String, key: String },
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvVar {
    pub name: String,
    pub source: EnvSource,
}

impl EnvVar {
    pub fn plain(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            source: EnvSource::Value(value.into()),
        }
    }

    pub fn secret(name: &str, secret: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            source: EnvSource::SecretKey {
                secret: secret.to_string(),
                key: key.to_string(),
            },
        }
    }

    pub fn field(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            source: EnvSource::Field(path.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum VolumeSource {
    PersistentClaim(String),
    EmptyDir,
    Secret(String),
    /// Single key projected out of a secret
    ProjectedSecret { secret: String, key: String },
    ConfigMap(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
}

/// Single-container deployment of a supplementary service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentManifest {
    pub name: String,
    pub labels: Labels,
    pub selector: Labels,
    pub template_labels: Labels,
    pub replicas: i32,
    pub image: String,
    pub image_pull_policy: Option<String>,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub port: Option<i32>,
    pub env: Vec<EnvVar>,
    pub resources: ResourceRequirements,
    pub node_selector: BTreeMap<String, String>,
    pub volumes: Vec<Volume>,
    pub mounts: Vec<VolumeMount>,
    pub tolerations: Vec<Toleration>,
    pub service_account_name: String,
    pub priority_class_name: String,
}

impl DeploymentManifest {
    /// Deployment selected by `name=<name>`, with the resource-wide pod policies applied
    pub fn new(name: &str, image: &str, spec: &CassandraServicesSpec) -> Self {
        let selector = super::labels([(crate::constants::NAME, name)]);
        Self {
            name: name.to_string(),
            labels: selector.clone(),
            selector: selector.clone(),
            template_labels: selector,
            replicas: 1,
            image: image.to_string(),
            image_pull_policy: spec.image_pull_policy.clone(),
            command: Vec::new(),
            args: Vec::new(),
            port: None,
            env: Vec::new(),
            resources: ResourceRequirements::default(),
            node_selector: BTreeMap::new(),
            volumes: Vec::new(),
            mounts: Vec::new(),
            tolerations: spec.tolerations(),
            service_account_name: spec.service_account_name.clone(),
            priority_class_name: String::new(),
        }
    }

    pub fn env_value(&self, name: &str) -> Option<&EnvSource> {
        self.env.iter().find(|var| var.name == name).map(|var| &var.source)
    }

    /// Merge standard labels into both the object and its pod template
    pub fn apply_labels(&mut self, labels: &Labels) {
        for (key, value) in labels {
            self.labels.insert(key.clone(), value.clone());
            self.template_labels.insert(key.clone(), value.clone());
        }
    }
}

/// Standard `app.kubernetes.io/*` labels for a service
#[derive(Debug, Clone, Copy)]
pub struct BasicLabels<'a> {
    pub app_name: &'a str,
    pub component: &'a str,
    pub technology: &'a str,
}

impl BasicLabels<'_> {
    pub fn labels(&self, spec: &CassandraServicesSpec) -> Labels {
        let mut labels = Labels::new();
        labels.insert(APP_INSTANCE.to_string(), spec.instance.clone());
        labels.insert(APP_VERSION.to_string(), spec.artifact_descriptor_version.clone());
        labels.insert(APP_PART_OF.to_string(), spec.part_of.clone());
        labels.insert(APP_MANAGED_BY.to_string(), spec.managed_by.clone());

        for (key, value) in [
            (APP_NAME, self.app_name),
            (APP_COMPONENT, self.component),
            (APP_TECHNOLOGY, self.technology),
        ] {
            if !value.is_empty() {
                labels.insert(key.to_string(), value.to_string());
            }
        }
        labels
    }
}

/// Launcher that resolves vault references before starting the service
pub const VAULT_ENV: &str = "/vault/vault-env";

/// Start the container through the vault launcher
///
/// The service entrypoint and its arguments become launcher arguments.
pub fn vault_wiring(
    deployment: &mut DeploymentManifest,
    entrypoint: &[&str],
    vault: &VaultRegistration,
) {
    if !vault.enabled {
        return;
    }

    let mut args: Vec<String> = entrypoint.iter().map(|arg| arg.to_string()).collect();
    args.append(&mut deployment.args);
    deployment.command = vec![VAULT_ENV.to_string()];
    deployment.args = args;
    deployment.env.push(EnvVar::plain("VAULT_PATH", vault.path.clone()));
}

/// Mount the cluster root CA so the service can verify Cassandra
pub fn tls_client_wiring(
    deployment: &mut DeploymentManifest,
    root_cert_path: &str,
    tls: &TlsSettings,
) {
    if !tls.enabled {
        return;
    }

    deployment.volumes.push(Volume {
        name: ROOT_CERT.to_string(),
        source: VolumeSource::ProjectedSecret {
            secret: tls.root_ca_secret_name.clone(),
            key: tls.root_ca_file_name.clone(),
        },
    });
    deployment.mounts.push(VolumeMount {
        name: ROOT_CERT.to_string(),
        mount_path: root_cert_path.to_string(),
        read_only: false,
    });
    deployment.env.push(EnvVar::plain("TLS_ENABLED", "true"));
    deployment.env.push(EnvVar::plain(
        "TLS_ROOTCERT",
        format!("{}{}", root_cert_path, tls.root_ca_file_name),
    ));
}

/// Mount the service's own certificate so it can serve HTTPS
pub fn tls_server_wiring(
    deployment: &mut DeploymentManifest,
    tls: &TlsSettings,
    secret_name: &str,
    mount_path: &str,
) {
    if !tls.enabled {
        return;
    }

    deployment.volumes.push(Volume {
        name: secret_name.to_string(),
        source: VolumeSource::Secret(secret_name.to_string()),
    });
    deployment.mounts.push(VolumeMount {
        name: secret_name.to_string(),
        mount_path: mount_path.to_string(),
        read_only: true,
    });
    deployment.env.extend([
        EnvVar::plain("INTERNAL_TLS_ENABLED", "true"),
        EnvVar::plain(
            "INTERNAL_TLS_ROOTCERT",
            format!("{}{}", mount_path, tls.root_ca_file_name),
        ),
        EnvVar::plain(
            "INTERNAL_TLS_CERTIFICATE_FILENAME",
            format!("{}{}", mount_path, tls.signed_crt_file_name),
        ),
        EnvVar::plain(
            "INTERNAL_TLS_KEY_FILENAME",
            format!("{}{}", mount_path, tls.private_key_file_name),
        ),
        EnvVar::plain("INTERNAL_TLS_PATH", mount_path),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_labels_skip_empty_values() {
        let mut spec = CassandraServicesSpec::default();
        spec.instance = "prod".to_string();
        let labels = BasicLabels {
            app_name: "cassandra-backup-daemon",
            component: "backend",
            technology: "",
        }
        .labels(&spec);

        assert_eq!(labels.get(APP_NAME).map(String::as_str), Some("cassandra-backup-daemon"));
        assert_eq!(labels.get(APP_INSTANCE).map(String::as_str), Some("prod"));
        assert!(!labels.contains_key(APP_TECHNOLOGY));
    }

    #[test]
    fn test_tls_client_wiring_disabled_is_noop() {
        let spec = CassandraServicesSpec::default();
        let mut deployment = DeploymentManifest::new("svc", "image", &spec);
        tls_client_wiring(&mut deployment, "/usr/ssl/", &spec.tls);
        assert!(deployment.volumes.is_empty());
        assert!(deployment.env.is_empty());
    }

    #[test]
    fn test_tls_client_wiring_mounts_root_ca() {
        let mut spec = CassandraServicesSpec::default();
        spec.tls.enabled = true;
        spec.tls.root_ca_secret_name = "root-ca-secret".to_string();
        spec.tls.root_ca_file_name = "ca.crt".to_string();

        let mut deployment = DeploymentManifest::new("svc", "image", &spec);
        tls_client_wiring(&mut deployment, "/usr/ssl/", &spec.tls);

        assert_eq!(deployment.volumes.len(), 1);
        assert_eq!(deployment.mounts[0].mount_path, "/usr/ssl/");
        assert_eq!(
            deployment.env_value("TLS_ROOTCERT"),
            Some(&EnvSource::Value("/usr/ssl/ca.crt".to_string()))
        );
    }

    #[test]
    fn test_vault_wiring_wraps_entrypoint() {
        let mut spec = CassandraServicesSpec::default();
        spec.vault_registration.enabled = true;
        spec.vault_registration.path = "secret/cassandra".to_string();

        let mut deployment = DeploymentManifest::new("robot-tests", "image", &spec);
        deployment.args = vec!["--smoke".to_string()];
        vault_wiring(&mut deployment, &["/docker-entrypoint.sh"], &spec.vault_registration);

        assert_eq!(deployment.command, vec![VAULT_ENV]);
        assert_eq!(deployment.args, vec!["/docker-entrypoint.sh", "--smoke"]);
    }
}

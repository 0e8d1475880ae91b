// SPDX-License-Identifier: AGPL-3.0-or-later
//! Declarative resource describing the desired supplementary services
//!
//! The document is the custom resource a user applies to the cluster. Keys
//! are camelCase so manifests written for the cluster load unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, ServicesError};

/// A `CassandraServices` resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CassandraServices {
    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: CassandraServicesSpec,
}

/// Object metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: Option<String>,
}

/// Desired state of all supplementary services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CassandraServicesSpec {
    pub cassandra: CassandraConnection,

    #[serde(default)]
    pub deployment_version: String,

    /// Seconds to wait for claims and pods
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u64,

    #[serde(default)]
    pub policies: Option<Policies>,

    #[serde(default)]
    pub tls: TlsSettings,

    #[serde(default)]
    pub backup_daemon: BackupSpec,

    #[serde(default)]
    pub dbaas: DbaasSpec,

    #[serde(default)]
    pub robot_tests: RobotTestsSpec,

    #[serde(default)]
    pub vault_registration: VaultRegistration,

    #[serde(default)]
    pub service_account_name: String,

    #[serde(default)]
    pub ip_v6: bool,

    #[serde(default)]
    pub gocql_connect_timeout: u64,

    #[serde(default)]
    pub gocql_timeout: u64,

    #[serde(default)]
    pub image_pull_policy: Option<String>,

    /// Managed cloud keyspaces mode
    #[serde(default)]
    pub aws_keyspaces: AwsKeyspaces,

    #[serde(default)]
    pub artifact_descriptor_version: String,

    #[serde(default)]
    pub part_of: String,

    #[serde(default)]
    pub managed_by: String,

    #[serde(default)]
    pub instance: String,

    #[serde(default, rename = "deletePVConUninstall")]
    pub delete_pvc_on_uninstall: bool,
}

/// Connection to the managed Cassandra cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CassandraConnection {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    /// Secret holding the admin `username` and `password`
    pub secret_name: String,

    #[serde(default)]
    pub default_keyspace: Option<String>,

    #[serde(default)]
    pub consistency: Option<String>,

    #[serde(default)]
    pub tls: bool,

    #[serde(default)]
    pub deployment_schema: DeploymentSchema,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSchema {
    #[serde(default)]
    pub data_centers: Vec<DataCenter>,
}

/// A named, independently scaled partition of the cluster topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCenter {
    pub name: String,

    #[serde(default)]
    pub replicas: u32,

    #[serde(default)]
    pub deploy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policies {
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub effect: String,
    #[serde(default)]
    pub toleration_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, rename = "rootCASecretName")]
    pub root_ca_secret_name: String,
    #[serde(default, rename = "rootCAFileName")]
    pub root_ca_file_name: String,
    #[serde(default, rename = "signedCRTFileName")]
    pub signed_crt_file_name: String,
    #[serde(default)]
    pub private_key_file_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

/// Persistent storage request for a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRequirements {
    #[serde(default)]
    pub size: Vec<String>,
    #[serde(default)]
    pub storage_class: Vec<String>,
    /// Pre-provisioned volumes to bind, by index
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Node placement per claim, by index
    #[serde(default)]
    pub node_labels: Vec<BTreeMap<String, String>>,
    /// Ephemeral storage: no claim is provisioned
    #[serde(default)]
    pub empty_dir: bool,
    #[serde(default, rename = "waitPVCBound")]
    pub wait_pvc_bound: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    #[serde(default)]
    pub install: bool,
    #[serde(default)]
    pub storage_directory: String,
    #[serde(default)]
    pub docker_image: String,
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub backup_schedule: String,
    #[serde(default)]
    pub granular_backup_schedule: String,
    #[serde(default)]
    pub granular_backup_scheduled_dbs: Vec<String>,
    #[serde(default)]
    pub eviction_policy: String,
    #[serde(default)]
    pub granular_eviction_policy: String,
    #[serde(default)]
    pub username: String,
    /// Secret holding the backup daemon API credentials
    #[serde(default)]
    pub secret_name: String,
    #[serde(default)]
    pub storage: StorageRequirements,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub priority_class_name: String,
    #[serde(default)]
    pub s3: S3Backup,
    #[serde(default)]
    pub tls: BackupDaemonTls,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Backup {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub secret_name: String,
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default)]
    pub endpoint_url: String,
    #[serde(default)]
    pub ssl_verify: bool,
    #[serde(default)]
    pub ssl_secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDaemonTls {
    #[serde(default, rename = "backupDaemonCASecretName")]
    pub backup_daemon_ca_secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbaasSpec {
    #[serde(default)]
    pub install: bool,
    #[serde(default)]
    pub docker_image: String,
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub adapter: DbaasAdapterCredentials,
    #[serde(default)]
    pub aggregator: DbaasAggregatorCredentials,
    #[serde(default)]
    pub priority_class_name: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub multi_users: bool,
    /// Default topology strategy for keyspaces created through the adapter
    #[serde(default)]
    pub topology_strategy: String,
    #[serde(default)]
    pub tls: DbaasAdapterTls,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbaasAdapterCredentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbaasAggregatorCredentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub physical_database_identifier: String,
    #[serde(default)]
    pub dbaas_aggregator_registration_address: String,
    #[serde(default)]
    pub secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbaasAdapterTls {
    #[serde(default, rename = "dbaasAdapterCASecretName")]
    pub dbaas_adapter_ca_secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotTestsSpec {
    #[serde(default)]
    pub install: bool,
    #[serde(default)]
    pub docker_image: String,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub prometheus_url: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub replication_factor: u32,
    #[serde(default)]
    pub attempts_number: u32,
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRegistration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub rotation_period: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsKeyspaces {
    #[serde(default)]
    pub install: bool,
    #[serde(default)]
    pub secret_name: String,
    #[serde(default)]
    pub host: String,
}

fn default_wait_timeout() -> u64 {
    300
}

impl CassandraServices {
    /// Load a resource document from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .map(|ext| ext == "json")
            .unwrap_or(false);

        let parsed = if is_json {
            serde_json::from_str::<Self>(&contents).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str::<Self>(&contents).map_err(|e| e.to_string())
        };

        let resource = parsed.map_err(|message| ServicesError::ResourceParseError {
            path: path.display().to_string(),
            message,
        })?;

        resource.validate()?;
        Ok(resource)
    }

    /// Check the invariants a pass relies on
    pub fn validate(&self) -> Result<()> {
        if self.spec.cassandra.secret_name.is_empty() {
            return Err(ServicesError::InvalidConfig {
                message: "cassandra.secretName cannot be empty".to_string(),
            });
        }

        let mut names = std::collections::BTreeSet::new();
        for dc in &self.spec.cassandra.deployment_schema.data_centers {
            if dc.name.is_empty() {
                return Err(ServicesError::InvalidConfig {
                    message: "data center name cannot be empty".to_string(),
                });
            }
            if !names.insert(dc.name.as_str()) {
                return Err(ServicesError::InvalidConfig {
                    message: format!("duplicate data center '{}'", dc.name),
                });
            }
        }

        if self.spec.dbaas.install && self.spec.dbaas.adapter.secret_name.is_empty() {
            return Err(ServicesError::InvalidConfig {
                message: "dbaas.adapter.secretName is required when dbaas is installed"
                    .to_string(),
            });
        }

        Ok(())
    }
}

impl CassandraServicesSpec {
    /// Data centers enabled for deployment, in declaration order
    pub fn deployed_data_centers(&self) -> impl Iterator<Item = &DataCenter> {
        self.cassandra
            .deployment_schema
            .data_centers
            .iter()
            .filter(|dc| dc.deploy)
    }

    /// Cassandra host, defaulting to the in-namespace service name
    pub fn cassandra_host(&self, namespace: &str) -> String {
        match &self.cassandra.host {
            Some(host) if !host.is_empty() => host.clone(),
            _ => format!("cassandra.{}", namespace),
        }
    }

    pub fn cassandra_port(&self) -> u16 {
        self.cassandra.port.filter(|port| *port != 0).unwrap_or(9042)
    }

    pub fn tolerations(&self) -> Vec<Toleration> {
        self.policies
            .as_ref()
            .map(|policies| policies.tolerations.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOURCE: &str = r#"
metadata:
  name: cassandra-services
  namespace: cassandra
spec:
  cassandra:
    secretName: cassandra-secret
    deploymentSchema:
      dataCenters:
        - name: dc0
          replicas: 3
          deploy: true
        - name: dc1
          replicas: 2
  backupDaemon:
    install: true
    secretName: cassandra-backup-api-credentials
    storage:
      size: ["5Gi"]
      waitPVCBound: true
  tls:
    enabled: true
    rootCAFileName: ca.crt
  deletePVConUninstall: true
"#;

    #[test]
    fn test_parse_yaml_resource() {
        let resource: CassandraServices = serde_yaml::from_str(RESOURCE).unwrap();
        assert_eq!(resource.metadata.name, "cassandra-services");
        assert_eq!(resource.spec.cassandra.deployment_schema.data_centers.len(), 2);
        assert!(resource.spec.backup_daemon.install);
        assert!(resource.spec.backup_daemon.storage.wait_pvc_bound);
        assert!(!resource.spec.backup_daemon.storage.empty_dir);
        assert_eq!(resource.spec.tls.root_ca_file_name, "ca.crt");
        assert!(resource.spec.delete_pvc_on_uninstall);
        assert!(!resource.spec.dbaas.install);
        assert_eq!(resource.spec.wait_timeout, 300);
        assert!(resource.validate().is_ok());
    }

    #[test]
    fn test_deployed_data_centers_skips_disabled() {
        let resource: CassandraServices = serde_yaml::from_str(RESOURCE).unwrap();
        let names: Vec<_> = resource
            .spec
            .deployed_data_centers()
            .map(|dc| dc.name.as_str())
            .collect();
        assert_eq!(names, vec!["dc0"]);
    }

    #[test]
    fn test_cassandra_host_defaults_to_namespace_service() {
        let mut spec = CassandraServicesSpec::default();
        assert_eq!(spec.cassandra_host("ns"), "cassandra.ns");
        assert_eq!(spec.cassandra_port(), 9042);

        spec.cassandra.host = Some("cassandra.example".to_string());
        spec.cassandra.port = Some(9142);
        assert_eq!(spec.cassandra_host("ns"), "cassandra.example");
        assert_eq!(spec.cassandra_port(), 9142);
    }

    #[test]
    fn test_validate_rejects_duplicate_data_centers() {
        let mut resource: CassandraServices = serde_yaml::from_str(RESOURCE).unwrap();
        resource.spec.cassandra.deployment_schema.data_centers[1].name = "dc0".to_string();
        assert!(resource.validate().is_err());
    }

    #[test]
    fn test_validate_requires_adapter_secret() {
        let mut resource: CassandraServices = serde_yaml::from_str(RESOURCE).unwrap();
        resource.spec.dbaas.install = true;
        assert!(resource.validate().is_err());
    }
}

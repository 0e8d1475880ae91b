// SPDX-License-Identifier: AGPL-3.0-or-later
//! Last applied configuration tracking
//!
//! A snapshot records a SHA-256 fingerprint of every common field and of each
//! service's own section. Comparing the current resource against the stored
//! snapshot tells a pass which pipelines have something to do.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::resource::CassandraServicesSpec;
use crate::services::ServiceKind;

/// Reads one common field out of the resource
pub type Extractor = fn(&CassandraServicesSpec) -> serde_json::Result<Value>;

/// A resource field whose change affects every service
#[derive(Clone, Copy)]
pub struct CommonField {
    pub name: &'static str,
    pub extract: Extractor,
}

/// Fields shared by all services, in comparison order
pub static COMMON_FIELDS: &[CommonField] = &[
    CommonField {
        name: "cassandra",
        extract: cassandra,
    },
    CommonField {
        name: "policies",
        extract: policies,
    },
    CommonField {
        name: "tls",
        extract: tls,
    },
    CommonField {
        name: "vaultRegistration",
        extract: vault_registration,
    },
    CommonField {
        name: "imagePullPolicy",
        extract: image_pull_policy,
    },
    CommonField {
        name: "awsKeyspaces",
        extract: aws_keyspaces,
    },
];

fn cassandra(spec: &CassandraServicesSpec) -> serde_json::Result<Value> {
    serde_json::to_value(&spec.cassandra)
}

fn policies(spec: &CassandraServicesSpec) -> serde_json::Result<Value> {
    serde_json::to_value(&spec.policies)
}

fn tls(spec: &CassandraServicesSpec) -> serde_json::Result<Value> {
    serde_json::to_value(&spec.tls)
}

fn vault_registration(spec: &CassandraServicesSpec) -> serde_json::Result<Value> {
    serde_json::to_value(&spec.vault_registration)
}

fn image_pull_policy(spec: &CassandraServicesSpec) -> serde_json::Result<Value> {
    serde_json::to_value(&spec.image_pull_policy)
}

fn aws_keyspaces(spec: &CassandraServicesSpec) -> serde_json::Result<Value> {
    serde_json::to_value(&spec.aws_keyspaces)
}

/// SHA-256 of the canonical JSON form of `value`
pub fn fingerprint(value: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Fingerprints of the last successfully applied resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecSnapshot {
    /// Common field name to fingerprint
    #[serde(default)]
    pub common: BTreeMap<String, String>,

    /// Service resource name to fingerprint of its section
    #[serde(default)]
    pub services: BTreeMap<String, String>,
}

impl SpecSnapshot {
    /// Fingerprint the current resource
    pub fn capture(spec: &CassandraServicesSpec) -> Result<Self> {
        let mut common = BTreeMap::new();
        for field in COMMON_FIELDS {
            let value = (field.extract)(spec)?;
            common.insert(field.name.to_string(), fingerprint(&value)?);
        }

        let mut services = BTreeMap::new();
        for service in ServiceKind::ALL {
            let value = service.section(spec)?;
            services.insert(service.resource_name().to_string(), fingerprint(&value)?);
        }

        Ok(Self { common, services })
    }

    /// What changed between `previous` and this snapshot
    ///
    /// Without a previous snapshot everything counts as changed, and a field
    /// the previous snapshot does not know about counts as changed too.
    pub fn diff(&self, previous: Option<&SpecSnapshot>) -> ChangeSet {
        let previous = match previous {
            Some(previous) => previous,
            None => return ChangeSet::all(),
        };

        let changed_fields: Vec<String> = self
            .common
            .iter()
            .filter(|(name, hash)| previous.common.get(*name) != Some(*hash))
            .map(|(name, _)| name.clone())
            .collect();

        let changed_services = ServiceKind::ALL
            .into_iter()
            .filter(|service| {
                let name = service.resource_name();
                previous.services.get(name) != self.services.get(name)
            })
            .collect();

        ChangeSet {
            common_changed: !changed_fields.is_empty(),
            changed_fields,
            changed_services,
        }
    }
}

/// Result of comparing the resource against the last applied snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub common_changed: bool,
    /// Names of the common fields that changed
    pub changed_fields: Vec<String>,
    pub changed_services: BTreeSet<ServiceKind>,
}

impl ChangeSet {
    /// Compare `spec` against `previous`
    pub fn detect(spec: &CassandraServicesSpec, previous: Option<&SpecSnapshot>) -> Result<Self> {
        Ok(SpecSnapshot::capture(spec)?.diff(previous))
    }

    /// Everything changed, as on a first run
    pub fn all() -> Self {
        Self {
            common_changed: true,
            changed_fields: COMMON_FIELDS
                .iter()
                .map(|field| field.name.to_string())
                .collect(),
            changed_services: ServiceKind::ALL.into_iter().collect(),
        }
    }

    pub fn service_changed(&self, service: ServiceKind) -> bool {
        self.changed_services.contains(&service)
    }

    /// Whether `service`'s pipeline has anything to apply
    pub fn affects(&self, service: ServiceKind) -> bool {
        self.common_changed || self.service_changed(service)
    }

    pub fn is_empty(&self) -> bool {
        !self.common_changed && self.changed_services.is_empty()
    }
}

/// Persistence for the last applied snapshot
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<SpecSnapshot>>;

    async fn save(&self, snapshot: &SpecSnapshot) -> Result<()>;
}

/// Snapshot kept as a JSON file
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Result<Option<SpecSnapshot>> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!(path = %self.path.display(), "No snapshot recorded yet");
            return Ok(None);
        }

        let contents = tokio::fs::read_to_string(&self.path).await?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    async fn save(&self, snapshot: &SpecSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let contents = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&self.path, contents).await?;
        debug!(path = %self.path.display(), "Snapshot saved");
        Ok(())
    }
}

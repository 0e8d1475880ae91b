// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-pass execution context
//!
//! Holds the resource being reconciled, the collaborators steps talk to, and
//! the values steps publish for later steps of the same pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{ClusterApi, RemoteShell};
use crate::cql::SessionFactory;
use crate::pipeline::DeployType;
use crate::resource::{CassandraServices, CassandraServicesSpec};
use crate::services::ServiceKind;
use crate::snapshot::ChangeSet;
use crate::vault::VaultClient;

/// Retry budget for key propagation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Complete attempts per cluster member
    pub tries_count: u32,
    /// Pause between failed attempts
    pub retry_timeout: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            tries_count: 5,
            retry_timeout: Duration::from_secs(10),
        }
    }
}

/// Storage a provisioning step made available to its service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishedStorage {
    pub claims: Vec<String>,
    pub node_selectors: Vec<BTreeMap<String, String>>,
}

/// Everything a step may read or publish during one pass
pub struct ExecutionContext {
    resource: Arc<CassandraServices>,
    namespace: String,
    cluster: Arc<dyn ClusterApi>,
    shell: Arc<dyn RemoteShell>,
    sessions: Arc<dyn SessionFactory>,
    vault: Option<Arc<dyn VaultClient>>,
    retry: RetrySettings,
    changes: ChangeSet,
    deploy_types: HashMap<ServiceKind, DeployType>,
    storage: HashMap<ServiceKind, PublishedStorage>,
}

impl ExecutionContext {
    pub fn new(
        resource: Arc<CassandraServices>,
        namespace: impl Into<String>,
        cluster: Arc<dyn ClusterApi>,
        shell: Arc<dyn RemoteShell>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            resource,
            namespace: namespace.into(),
            cluster,
            shell,
            sessions,
            vault: None,
            retry: RetrySettings::default(),
            changes: ChangeSet::default(),
            deploy_types: HashMap::new(),
            storage: HashMap::new(),
        }
    }

    pub fn with_vault(mut self, vault: Arc<dyn VaultClient>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn resource(&self) -> &CassandraServices {
        &self.resource
    }

    pub fn spec(&self) -> &CassandraServicesSpec {
        &self.resource.spec
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cluster(&self) -> Arc<dyn ClusterApi> {
        Arc::clone(&self.cluster)
    }

    pub fn shell(&self) -> Arc<dyn RemoteShell> {
        Arc::clone(&self.shell)
    }

    pub fn sessions(&self) -> Arc<dyn SessionFactory> {
        Arc::clone(&self.sessions)
    }

    pub fn vault(&self) -> Option<Arc<dyn VaultClient>> {
        self.vault.clone()
    }

    pub fn retry(&self) -> RetrySettings {
        self.retry
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn set_changes(&mut self, changes: ChangeSet) {
        self.changes = changes;
    }

    pub fn deploy_type(&self, service: ServiceKind) -> Option<DeployType> {
        self.deploy_types.get(&service).copied()
    }

    pub fn set_deploy_type(&mut self, service: ServiceKind, deploy_type: DeployType) {
        self.deploy_types.insert(service, deploy_type);
    }

    /// Storage published for `service`, empty if none was provisioned
    pub fn storage(&self, service: ServiceKind) -> PublishedStorage {
        self.storage.get(&service).cloned().unwrap_or_default()
    }

    pub fn publish_claims(&mut self, service: ServiceKind, claims: Vec<String>) {
        self.storage.entry(service).or_default().claims = claims;
    }

    pub fn publish_node_selectors(
        &mut self,
        service: ServiceKind,
        selectors: Vec<BTreeMap<String, String>>,
    ) {
        self.storage.entry(service).or_default().node_selectors = selectors;
    }
}

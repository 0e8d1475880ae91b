// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory backend
//!
//! Implements every collaborator trait against plain in-process state. It
//! records what a pass did (objects applied, statements run, remote
//! commands) and lets callers inject failures, which makes it the backend
//! for `simulate` and for tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::cluster::{
    labels, ClaimRequest, ClusterApi, ClusterMember, ClusterResult, DeploymentManifest, Labels,
    RemoteShell, Secret, SecretManifest, ServiceManifest,
};
use crate::constants::{
    CASSANDRA, CASSANDRA_CLUSTER, MAJOR_VERSION_CONFIG, PASSWORD, SERVICE, USERNAME,
};
use crate::context::{ExecutionContext, RetrySettings};
use crate::cql::{CqlResult, CqlSession, Row, RowCursor, SessionFactory, SessionParams};
use crate::credentials::{CREATE_TABLE, INSERT_KEY, SELECT_KEY};
use crate::error::{ClusterError, CqlError, Result, VaultError};
use crate::resource::CassandraServices;
use crate::snapshot::{SnapshotStore, SpecSnapshot};
use crate::vault::{VaultClient, VaultResult};

/// Namespace used when a resource does not name one
pub const DEFAULT_NAMESPACE: &str = "cassandra";

/// A mutating call made against [`InMemoryCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterAction {
    EnsureClaim(String),
    ApplySecret(String),
    RecreateService(String),
    DeleteDeployment(String),
    ApplyDeployment(String),
    WaitPodsReady(String),
    WaitTestsComplete(String),
}

#[derive(Default)]
struct ClusterState {
    claims: Vec<ClaimRequest>,
    claim_probe_error: Option<String>,
    volume_nodes: BTreeMap<String, String>,
    secrets: BTreeMap<String, Secret>,
    failing_secret_reads: BTreeSet<String>,
    config_maps: BTreeMap<String, BTreeMap<String, String>>,
    services: BTreeMap<String, ServiceManifest>,
    deployments: BTreeMap<String, DeploymentManifest>,
    pods: Vec<(Labels, ClusterMember)>,
    actions: Vec<ClusterAction>,
    exec_log: Vec<(String, String)>,
    failing_members: BTreeSet<String>,
    pending_exec_failures: BTreeMap<String, usize>,
}

fn matches(object: &Labels, selector: &Labels) -> bool {
    selector
        .iter()
        .all(|(key, value)| object.get(key) == Some(value))
}

/// Cluster API and remote shell backed by in-process state
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admin secret, major version config map, and one database pod per
    /// replica of every deployed data center
    pub async fn seed(&self, resource: &CassandraServices, namespace: &str) {
        let spec = &resource.spec;
        let mut admin = BTreeMap::new();
        admin.insert(USERNAME.to_string(), CASSANDRA.to_string());
        admin.insert(PASSWORD.to_string(), CASSANDRA.to_string());
        self.add_secret(&spec.cassandra.secret_name, admin).await;

        let mut versions = BTreeMap::new();
        versions.insert("majorVersion".to_string(), "4".to_string());
        self.add_config_map(MAJOR_VERSION_CONFIG, versions).await;

        for dc in spec.deployed_data_centers() {
            for replica in 0..dc.replicas {
                self.add_pod(
                    ClusterMember {
                        name: format!("{}-{}-{}", CASSANDRA, dc.name, replica),
                        namespace: namespace.to_string(),
                        container: CASSANDRA.to_string(),
                    },
                    labels([(SERVICE, CASSANDRA_CLUSTER)]),
                )
                .await;
            }
        }
    }

    pub async fn add_secret(&self, name: &str, data: BTreeMap<String, String>) {
        let secret = Secret {
            name: name.to_string(),
            data,
        };
        self.state
            .lock()
            .await
            .secrets
            .insert(name.to_string(), secret);
    }

    pub async fn add_config_map(&self, name: &str, data: BTreeMap<String, String>) {
        self.state
            .lock()
            .await
            .config_maps
            .insert(name.to_string(), data);
    }

    pub async fn add_pod(&self, member: ClusterMember, pod_labels: Labels) {
        self.state.lock().await.pods.push((pod_labels, member));
    }

    /// Pre-existing storage claim, as left by an earlier install
    pub async fn add_claim(&self, claim: ClaimRequest) {
        self.state.lock().await.claims.push(claim);
    }

    pub async fn pin_volume(&self, volume: &str, node: &str) {
        self.state
            .lock()
            .await
            .volume_nodes
            .insert(volume.to_string(), node.to_string());
    }

    /// Make every claim listing fail
    pub async fn fail_claim_probe(&self, message: &str) {
        self.state.lock().await.claim_probe_error = Some(message.to_string());
    }

    pub async fn fail_secret_read(&self, name: &str) {
        self.state
            .lock()
            .await
            .failing_secret_reads
            .insert(name.to_string());
    }

    /// Make every remote command on `member` fail
    pub async fn fail_member(&self, member: &str) {
        self.state
            .lock()
            .await
            .failing_members
            .insert(member.to_string());
    }

    /// Make the next `count` remote commands on `member` fail
    pub async fn fail_next_commands(&self, member: &str, count: usize) {
        self.state
            .lock()
            .await
            .pending_exec_failures
            .insert(member.to_string(), count);
    }

    pub async fn claims(&self) -> Vec<ClaimRequest> {
        self.state.lock().await.claims.clone()
    }

    pub async fn secret(&self, name: &str) -> Option<Secret> {
        self.state.lock().await.secrets.get(name).cloned()
    }

    pub async fn service(&self, name: &str) -> Option<ServiceManifest> {
        self.state.lock().await.services.get(name).cloned()
    }

    pub async fn deployment(&self, name: &str) -> Option<DeploymentManifest> {
        self.state.lock().await.deployments.get(name).cloned()
    }

    pub async fn actions(&self) -> Vec<ClusterAction> {
        self.state.lock().await.actions.clone()
    }

    /// Every remote command attempted, as `(member, command)`
    pub async fn exec_log(&self) -> Vec<(String, String)> {
        self.state.lock().await.exec_log.clone()
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn list_claims(&self, _namespace: &str, selector: &Labels) -> ClusterResult<Vec<String>> {
        let state = self.state.lock().await;
        if let Some(message) = &state.claim_probe_error {
            return Err(ClusterError::Api {
                operation: "list claims".to_string(),
                message: message.clone(),
            });
        }

        Ok(state
            .claims
            .iter()
            .filter(|claim| matches(&claim.labels, selector))
            .map(|claim| claim.name.clone())
            .collect())
    }

    async fn ensure_claim(&self, _namespace: &str, claim: &ClaimRequest) -> ClusterResult<()> {
        let mut state = self.state.lock().await;
        match state.claims.iter_mut().find(|c| c.name == claim.name) {
            Some(existing) => *existing = claim.clone(),
            None => state.claims.push(claim.clone()),
        }
        state
            .actions
            .push(ClusterAction::EnsureClaim(claim.name.clone()));
        Ok(())
    }

    async fn wait_claim_bound(
        &self,
        namespace: &str,
        name: &str,
        _timeout: Duration,
    ) -> ClusterResult<()> {
        let state = self.state.lock().await;
        if state.claims.iter().any(|claim| claim.name == name) {
            Ok(())
        } else {
            Err(ClusterError::NotFound {
                kind: "PersistentVolumeClaim",
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
        }
    }

    async fn volume_node(&self, volume: &str) -> ClusterResult<Option<String>> {
        Ok(self.state.lock().await.volume_nodes.get(volume).cloned())
    }

    async fn read_secret(&self, namespace: &str, name: &str) -> ClusterResult<Secret> {
        let state = self.state.lock().await;
        if state.failing_secret_reads.contains(name) {
            return Err(ClusterError::Api {
                operation: format!("read secret {}", name),
                message: "forbidden".to_string(),
            });
        }

        state
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Secret",
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn apply_secret(&self, _namespace: &str, secret: &SecretManifest) -> ClusterResult<()> {
        let mut state = self.state.lock().await;
        state.secrets.insert(
            secret.name.clone(),
            Secret {
                name: secret.name.clone(),
                data: secret.string_data.clone(),
            },
        );
        state
            .actions
            .push(ClusterAction::ApplySecret(secret.name.clone()));
        Ok(())
    }

    async fn read_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<BTreeMap<String, String>> {
        self.state
            .lock()
            .await
            .config_maps
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "ConfigMap",
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn recreate_service(
        &self,
        _namespace: &str,
        service: &ServiceManifest,
    ) -> ClusterResult<()> {
        let mut state = self.state.lock().await;
        state.services.insert(service.name.clone(), service.clone());
        state
            .actions
            .push(ClusterAction::RecreateService(service.name.clone()));
        Ok(())
    }

    async fn delete_deployment(
        &self,
        _namespace: &str,
        name: &str,
        _timeout: Duration,
    ) -> ClusterResult<()> {
        let mut state = self.state.lock().await;
        state.deployments.remove(name);
        state
            .actions
            .push(ClusterAction::DeleteDeployment(name.to_string()));
        Ok(())
    }

    async fn apply_deployment(
        &self,
        _namespace: &str,
        deployment: &DeploymentManifest,
    ) -> ClusterResult<()> {
        let mut state = self.state.lock().await;
        state
            .deployments
            .insert(deployment.name.clone(), deployment.clone());
        state
            .actions
            .push(ClusterAction::ApplyDeployment(deployment.name.clone()));
        Ok(())
    }

    async fn wait_pods_ready(
        &self,
        _namespace: &str,
        selector: &Labels,
        _count: usize,
        _timeout: Duration,
    ) -> ClusterResult<()> {
        let name = selector.values().cloned().collect::<Vec<_>>().join(",");
        self.state
            .lock()
            .await
            .actions
            .push(ClusterAction::WaitPodsReady(name));
        Ok(())
    }

    async fn wait_tests_complete(
        &self,
        _namespace: &str,
        name: &str,
        _timeout: Duration,
    ) -> ClusterResult<()> {
        self.state
            .lock()
            .await
            .actions
            .push(ClusterAction::WaitTestsComplete(name.to_string()));
        Ok(())
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        selector: &Labels,
    ) -> ClusterResult<Vec<ClusterMember>> {
        Ok(self
            .state
            .lock()
            .await
            .pods
            .iter()
            .filter(|(pod_labels, _)| matches(pod_labels, selector))
            .map(|(_, member)| member.clone())
            .collect())
    }
}

#[async_trait]
impl RemoteShell for InMemoryCluster {
    async fn exec(&self, member: &ClusterMember, command: &str) -> ClusterResult<String> {
        let mut state = self.state.lock().await;
        state
            .exec_log
            .push((member.name.clone(), command.to_string()));

        let failure = || ClusterError::Exec {
            member: member.name.clone(),
            message: format!("command exited with status 1: {}", command),
        };

        if state.failing_members.contains(&member.name) {
            return Err(failure());
        }

        if let Some(pending) = state.pending_exec_failures.get_mut(&member.name) {
            if *pending > 0 {
                *pending -= 1;
                return Err(failure());
            }
        }

        Ok(String::new())
    }
}

#[derive(Default)]
struct CqlState {
    keyspace_replication: Option<String>,
    table: bool,
    rows: BTreeMap<String, String>,
    statements: Vec<String>,
    sessions_opened: usize,
    open_cursors: usize,
    last_params: Option<SessionParams>,
    open_failure: Option<String>,
    read_failure: Option<String>,
    write_failure: Option<String>,
    close_failure: bool,
}

/// Database sessions backed by an in-process `ssh.backup` table
#[derive(Default)]
pub struct InMemoryCql {
    state: Arc<Mutex<CqlState>>,
}

impl InMemoryCql {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a key row directly, creating the schema if needed
    pub async fn seed_key(&self, id: &str, key: &str) {
        let mut state = self.state.lock().await;
        state
            .keyspace_replication
            .get_or_insert_with(|| "{'class' : 'NetworkTopologyStrategy' }".to_string());
        state.table = true;
        state.rows.insert(id.to_string(), key.to_string());
    }

    pub async fn fail_open(&self, message: &str) {
        self.state.lock().await.open_failure = Some(message.to_string());
    }

    pub async fn fail_reads(&self, message: &str) {
        self.state.lock().await.read_failure = Some(message.to_string());
    }

    pub async fn fail_writes(&self, message: &str) {
        self.state.lock().await.write_failure = Some(message.to_string());
    }

    pub async fn fail_cursor_close(&self) {
        self.state.lock().await.close_failure = true;
    }

    /// Every statement run, in order
    pub async fn statements(&self) -> Vec<String> {
        self.state.lock().await.statements.clone()
    }

    pub async fn rows(&self) -> BTreeMap<String, String> {
        self.state.lock().await.rows.clone()
    }

    pub async fn keyspace_replication(&self) -> Option<String> {
        self.state.lock().await.keyspace_replication.clone()
    }

    pub async fn sessions_opened(&self) -> usize {
        self.state.lock().await.sessions_opened
    }

    pub async fn cursors_open(&self) -> usize {
        self.state.lock().await.open_cursors
    }

    pub async fn last_params(&self) -> Option<SessionParams> {
        self.state.lock().await.last_params.clone()
    }
}

fn replication_clause(statement: &str) -> String {
    statement
        .split_once("REPLICATION = ")
        .map(|(_, clause)| clause.to_string())
        .unwrap_or_default()
}

#[async_trait]
impl SessionFactory for InMemoryCql {
    async fn open(&self, params: &SessionParams) -> CqlResult<Box<dyn CqlSession>> {
        let mut state = self.state.lock().await;
        if let Some(message) = &state.open_failure {
            return Err(CqlError::Connection {
                host: params.host.clone(),
                message: message.clone(),
            });
        }

        state.sessions_opened += 1;
        state.last_params = Some(params.clone());
        Ok(Box::new(InMemorySession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct InMemorySession {
    state: Arc<Mutex<CqlState>>,
}

#[async_trait]
impl CqlSession for InMemorySession {
    async fn select(&self, statement: &str, values: &[&str]) -> CqlResult<Box<dyn RowCursor>> {
        let mut state = self.state.lock().await;
        state.statements.push(statement.to_string());

        if let Some(message) = &state.read_failure {
            return Err(CqlError::Statement {
                statement: statement.to_string(),
                message: message.clone(),
            });
        }
        if statement != SELECT_KEY {
            return Err(unsupported(statement));
        }
        if !state.table {
            return Err(CqlError::SchemaMissing("ssh.backup".to_string()));
        }

        let id = values.first().copied().unwrap_or_default();
        let row = state
            .rows
            .get(id)
            .map(|key| Row::new([id, key.as_str()]));
        state.open_cursors += 1;

        Ok(Box::new(InMemoryCursor {
            row,
            state: Arc::clone(&self.state),
        }))
    }

    async fn execute(&self, statement: &str, values: &[&str]) -> CqlResult<()> {
        let mut state = self.state.lock().await;
        state.statements.push(statement.to_string());

        if let Some(message) = &state.write_failure {
            return Err(CqlError::Statement {
                statement: statement.to_string(),
                message: message.clone(),
            });
        }

        if statement.starts_with("CREATE KEYSPACE IF NOT EXISTS ssh ") {
            if state.keyspace_replication.is_none() {
                state.keyspace_replication = Some(replication_clause(statement));
            }
        } else if statement.starts_with("ALTER KEYSPACE ssh ") {
            if state.keyspace_replication.is_none() {
                return Err(CqlError::SchemaMissing("ssh".to_string()));
            }
            state.keyspace_replication = Some(replication_clause(statement));
        } else if statement == CREATE_TABLE {
            if state.keyspace_replication.is_none() {
                return Err(CqlError::SchemaMissing("ssh".to_string()));
            }
            state.table = true;
        } else if statement == INSERT_KEY {
            if !state.table {
                return Err(CqlError::SchemaMissing("ssh.backup".to_string()));
            }
            match values {
                [id, key] => {
                    state.rows.insert(id.to_string(), key.to_string());
                }
                _ => {
                    return Err(CqlError::Statement {
                        statement: statement.to_string(),
                        message: format!("expected 2 bound values, got {}", values.len()),
                    })
                }
            }
        } else {
            return Err(unsupported(statement));
        }

        Ok(())
    }
}

fn unsupported(statement: &str) -> CqlError {
    CqlError::Statement {
        statement: statement.to_string(),
        message: "unsupported statement".to_string(),
    }
}

struct InMemoryCursor {
    row: Option<Row>,
    state: Arc<Mutex<CqlState>>,
}

#[async_trait]
impl RowCursor for InMemoryCursor {
    async fn next_row(&mut self) -> CqlResult<Option<Row>> {
        Ok(self.row.take())
    }

    async fn close(self: Box<Self>) -> CqlResult<()> {
        let mut state = self.state.lock().await;
        state.open_cursors = state.open_cursors.saturating_sub(1);
        if state.close_failure {
            return Err(CqlError::Close("connection reset".to_string()));
        }
        Ok(())
    }
}

/// Vault stand-in that resolves passwords from a table and records moves
#[derive(Default)]
pub struct InMemoryVault {
    passwords: Mutex<BTreeMap<String, String>>,
    moved: Mutex<Vec<(String, String)>>,
    move_failure: Mutex<Option<String>>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `stored` to `resolved`
    pub async fn set_password(&self, stored: &str, resolved: &str) {
        self.passwords
            .lock()
            .await
            .insert(stored.to_string(), resolved.to_string());
    }

    pub async fn fail_moves(&self, message: &str) {
        *self.move_failure.lock().await = Some(message.to_string());
    }

    /// Secrets moved so far, as `(secret, policy name)`
    pub async fn moved(&self) -> Vec<(String, String)> {
        self.moved.lock().await.clone()
    }
}

#[async_trait]
impl VaultClient for InMemoryVault {
    async fn resolve_password(&self, stored: &str) -> VaultResult<String> {
        Ok(self
            .passwords
            .lock()
            .await
            .get(stored)
            .cloned()
            .unwrap_or_else(|| stored.to_string()))
    }

    async fn move_secret_to_vault(
        &self,
        _namespace: &str,
        secret_name: &str,
        policy_name: &str,
        _policy: &str,
    ) -> VaultResult<()> {
        if let Some(message) = self.move_failure.lock().await.clone() {
            return Err(VaultError::Move {
                secret: secret_name.to_string(),
                message,
            });
        }

        self.moved
            .lock()
            .await
            .push((secret_name.to_string(), policy_name.to_string()));
        Ok(())
    }
}

/// Snapshot store that keeps the last snapshot in memory
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<Option<SpecSnapshot>>,
    saves: Mutex<usize>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: SpecSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            saves: Mutex::new(0),
        }
    }

    pub async fn saves(&self) -> usize {
        *self.saves.lock().await
    }

    pub async fn current(&self) -> Option<SpecSnapshot> {
        self.snapshot.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<SpecSnapshot>> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &SpecSnapshot) -> Result<()> {
        *self.snapshot.lock().await = Some(snapshot.clone());
        *self.saves.lock().await += 1;
        Ok(())
    }
}

/// The in-memory collaborators bundled together
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    pub cluster: Arc<InMemoryCluster>,
    pub cql: Arc<InMemoryCql>,
    pub vault: Arc<InMemoryVault>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with the cluster objects `resource` expects to find
    pub async fn seeded(resource: &CassandraServices) -> Self {
        let backend = Self::new();
        let namespace = resource
            .metadata
            .namespace
            .as_deref()
            .unwrap_or(DEFAULT_NAMESPACE);
        backend.cluster.seed(resource, namespace).await;
        backend
    }

    /// Context wired to this backend, retrying without pauses
    pub fn context(&self, resource: Arc<CassandraServices>, namespace: &str) -> ExecutionContext {
        ExecutionContext::new(
            resource,
            namespace,
            self.cluster.clone(),
            self.cluster.clone(),
            self.cql.clone(),
        )
        .with_vault(self.vault.clone())
        .with_retry(RetrySettings {
            tries_count: RetrySettings::default().tries_count,
            retry_timeout: Duration::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::DataCenter;

    #[tokio::test]
    async fn test_seed_creates_one_pod_per_deployed_replica() {
        let mut resource = CassandraServices::default();
        resource.spec.cassandra.secret_name = "cassandra-secret".to_string();
        resource.spec.cassandra.deployment_schema.data_centers = vec![
            DataCenter {
                name: "dc0".to_string(),
                replicas: 2,
                deploy: true,
            },
            DataCenter {
                name: "dc1".to_string(),
                replicas: 3,
                deploy: false,
            },
        ];

        let backend = InMemoryBackend::seeded(&resource).await;
        let pods = backend
            .cluster
            .list_pods("cassandra", &labels([(SERVICE, CASSANDRA_CLUSTER)]))
            .await
            .unwrap();
        let names: Vec<_> = pods.iter().map(|pod| pod.name.as_str()).collect();
        assert_eq!(names, vec!["cassandra-dc0-0", "cassandra-dc0-1"]);

        let secret = backend
            .cluster
            .read_secret("cassandra", "cassandra-secret")
            .await
            .unwrap();
        assert_eq!(secret.get(USERNAME), Some("cassandra"));
    }

    #[tokio::test]
    async fn test_claim_listing_filters_by_labels() {
        let cluster = InMemoryCluster::new();
        cluster
            .add_claim(ClaimRequest {
                name: "backup-data-0".to_string(),
                labels: labels([("name", "cassandra-backup-daemon")]),
                size: None,
                storage_class: None,
                volume: None,
                owned_by_resource: false,
            })
            .await;

        let backup = cluster
            .list_claims("cassandra", &labels([("name", "cassandra-backup-daemon")]))
            .await
            .unwrap();
        let other = cluster
            .list_claims("cassandra", &labels([("name", "robot-tests")]))
            .await
            .unwrap();
        assert_eq!(backup, vec!["backup-data-0"]);
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_alter_without_keyspace_reports_missing_schema() {
        let cql = InMemoryCql::new();
        let params = SessionParams {
            host: "localhost".to_string(),
            port: 9042,
            username: "cassandra".to_string(),
            password: "cassandra".to_string(),
            keyspace: "system".to_string(),
            consistency: crate::cql::Consistency::Quorum,
            tls_enabled: false,
            root_cert_path: None,
        };
        let session = cql.open(&params).await.unwrap();
        let err = session
            .execute("ALTER KEYSPACE ssh WITH REPLICATION = {}", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CqlError::SchemaMissing(_)));
    }
}

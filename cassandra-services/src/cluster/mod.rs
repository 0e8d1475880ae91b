// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster API seams
//!
//! The operator never talks to the API server directly. Everything it needs
//! from the cluster goes through [`ClusterApi`], and remote commands inside
//! database pods go through [`RemoteShell`].

mod manifest;

pub use manifest::{
    tls_client_wiring, tls_server_wiring, vault_wiring, BasicLabels, ClaimRequest,
    DeploymentManifest, EnvSource, EnvVar, SecretManifest, ServiceManifest, Volume, VolumeMount,
    VolumeSource, VAULT_ENV,
};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ClusterError;

/// Label selector, matched by equality on every entry
pub type Labels = BTreeMap<String, String>;

/// Result type for cluster calls
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// A live database pod, discovered by label selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    pub name: String,
    pub namespace: String,
    /// Primary container, the target of remote commands
    pub container: String,
}

/// Secret contents, already decoded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub data: BTreeMap<String, String>,
}

impl Secret {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

/// Operations the pipelines need from the cluster API
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Names of persistent volume claims carrying all of `selector`
    async fn list_claims(&self, namespace: &str, selector: &Labels) -> ClusterResult<Vec<String>>;

    /// Create the claim if absent, otherwise update it in place
    async fn ensure_claim(&self, namespace: &str, claim: &ClaimRequest) -> ClusterResult<()>;

    async fn wait_claim_bound(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> ClusterResult<()>;

    /// Node a persistent volume is pinned to, if any
    async fn volume_node(&self, volume: &str) -> ClusterResult<Option<String>>;

    async fn read_secret(&self, namespace: &str, name: &str) -> ClusterResult<Secret>;

    /// Create or replace a secret
    async fn apply_secret(&self, namespace: &str, secret: &SecretManifest) -> ClusterResult<()>;

    async fn read_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<BTreeMap<String, String>>;

    /// Delete the service if present, then create it
    async fn recreate_service(&self, namespace: &str, service: &ServiceManifest)
        -> ClusterResult<()>;

    /// Delete a deployment and wait for its pods to go away
    async fn delete_deployment(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> ClusterResult<()>;

    async fn apply_deployment(
        &self,
        namespace: &str,
        deployment: &DeploymentManifest,
    ) -> ClusterResult<()>;

    async fn wait_pods_ready(
        &self,
        namespace: &str,
        selector: &Labels,
        count: usize,
        timeout: Duration,
    ) -> ClusterResult<()>;

    /// Wait for a test-runner deployment to report its run finished
    async fn wait_tests_complete(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> ClusterResult<()>;

    /// Running pods carrying all of `selector`, in API order
    async fn list_pods(&self, namespace: &str, selector: &Labels)
        -> ClusterResult<Vec<ClusterMember>>;
}

/// Remote command channel into a cluster member
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run one shell command in the member's primary container
    async fn exec(&self, member: &ClusterMember, command: &str) -> ClusterResult<String>;
}

/// Build a selector from literal pairs
pub fn labels<const N: usize>(pairs: [(&str, &str); N]) -> Labels {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

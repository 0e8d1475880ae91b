// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistent storage provisioning and node placement

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::cluster::{labels, ClaimRequest};
use crate::constants::{KUBE_HOSTNAME, NAME};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::pipeline::DeployType;
use crate::resource::StorageRequirements;
use crate::services::ServiceKind;
use crate::step::Step;

/// Creates or updates the service's storage claims and publishes their names
#[derive(Debug, Clone)]
pub struct CreateStorageClaimsStep {
    pub service: ServiceKind,
    pub storage: StorageRequirements,
    /// Claim names are `<prefix>-<index>`
    pub claim_prefix: String,
    pub count: usize,
    /// Remove the claims together with the resource
    pub owned_by_resource: bool,
    pub wait_timeout: Duration,
}

impl CreateStorageClaimsStep {
    pub fn claim_names(&self) -> Vec<String> {
        (0..self.count)
            .map(|index| format!("{}-{}", self.claim_prefix, index))
            .collect()
    }

    fn request(&self, index: usize, name: String) -> ClaimRequest {
        ClaimRequest {
            name,
            labels: labels([(NAME, self.service.resource_name())]),
            size: self.storage.size.get(index).cloned(),
            storage_class: self.storage.storage_class.get(index).cloned(),
            volume: self
                .storage
                .volumes
                .get(index)
                .filter(|volume| !volume.is_empty())
                .cloned(),
            owned_by_resource: self.owned_by_resource,
        }
    }
}

#[async_trait]
impl Step for CreateStorageClaimsStep {
    fn name(&self) -> &str {
        "create-storage-claims"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let cluster = ctx.cluster();
        let namespace = ctx.namespace().to_string();
        let deploy_type = ctx.deploy_type(self.service).unwrap_or(DeployType::Empty);
        let names = self.claim_names();

        for (index, name) in names.iter().enumerate() {
            let request = self.request(index, name.clone());
            match deploy_type {
                DeployType::CleanDeploy => info!(claim = %name, "Creating storage claim"),
                DeployType::Update => info!(claim = %name, "Updating storage claim"),
                DeployType::Empty => debug!(claim = %name, "Ensuring storage claim"),
            }
            cluster.ensure_claim(&namespace, &request).await?;

            if self.storage.wait_pvc_bound {
                debug!(claim = %name, "Waiting for claim to be bound");
                cluster
                    .wait_claim_bound(&namespace, name, self.wait_timeout)
                    .await?;
            }
        }

        ctx.publish_claims(self.service, names);
        Ok(())
    }
}

/// Records the node each claim's volume lives on, for pod placement
#[derive(Debug, Clone)]
pub struct StoreNodesStep {
    pub service: ServiceKind,
    pub storage: StorageRequirements,
}

#[async_trait]
impl Step for StoreNodesStep {
    fn name(&self) -> &str {
        "store-nodes"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let cluster = ctx.cluster();
        let claims = ctx.storage(self.service).claims;
        let mut selectors = Vec::new();

        for index in 0..claims.len() {
            if let Some(node_labels) = self.storage.node_labels.get(index) {
                if !node_labels.is_empty() {
                    selectors.push(node_labels.clone());
                    continue;
                }
            }

            if let Some(volume) = self.storage.volumes.get(index).filter(|v| !v.is_empty()) {
                if let Some(node) = cluster.volume_node(volume).await? {
                    debug!(volume = %volume, node = %node, "Volume is pinned to node");
                    let mut selector = BTreeMap::new();
                    selector.insert(KUBE_HOSTNAME.to_string(), node);
                    selectors.push(selector);
                }
            }
        }

        debug!(service = %self.service, nodes = selectors.len(), "Node placement recorded");
        ctx.publish_node_selectors(self.service, selectors);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCluster, InMemoryCql};
    use crate::resource::CassandraServices;
    use std::sync::Arc;

    fn context(cluster: &Arc<InMemoryCluster>) -> ExecutionContext {
        ExecutionContext::new(
            Arc::new(CassandraServices::default()),
            "cassandra",
            cluster.clone(),
            cluster.clone(),
            Arc::new(InMemoryCql::new()),
        )
    }

    fn claims_step(storage: StorageRequirements) -> CreateStorageClaimsStep {
        CreateStorageClaimsStep {
            service: ServiceKind::Backup,
            storage,
            claim_prefix: "backup-data".to_string(),
            count: 1,
            owned_by_resource: true,
            wait_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_claims_are_created_and_published() {
        let cluster = Arc::new(InMemoryCluster::new());
        let mut ctx = context(&cluster);
        let storage = StorageRequirements {
            size: vec!["5Gi".to_string()],
            wait_pvc_bound: true,
            ..Default::default()
        };

        claims_step(storage).execute(&mut ctx).await.unwrap();

        let claims = cluster.claims().await;
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].name, "backup-data-0");
        assert_eq!(claims[0].size.as_deref(), Some("5Gi"));
        assert_eq!(
            claims[0].labels.get(NAME).map(String::as_str),
            Some("cassandra-backup-daemon")
        );
        assert_eq!(ctx.storage(ServiceKind::Backup).claims, vec!["backup-data-0"]);
    }

    #[tokio::test]
    async fn test_nodes_from_labels_then_volumes() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.pin_volume("pv-backup", "worker-2").await;
        let mut ctx = context(&cluster);
        ctx.publish_claims(
            ServiceKind::Backup,
            vec!["backup-data-0".to_string(), "backup-data-1".to_string()],
        );

        let mut explicit = BTreeMap::new();
        explicit.insert("zone".to_string(), "a".to_string());
        let step = StoreNodesStep {
            service: ServiceKind::Backup,
            storage: StorageRequirements {
                node_labels: vec![explicit.clone()],
                volumes: vec![String::new(), "pv-backup".to_string()],
                ..Default::default()
            },
        };
        step.execute(&mut ctx).await.unwrap();

        let selectors = ctx.storage(ServiceKind::Backup).node_selectors;
        assert_eq!(selectors.len(), 2);
        assert_eq!(selectors[0], explicit);
        assert_eq!(
            selectors[1].get(KUBE_HOSTNAME).map(String::as_str),
            Some("worker-2")
        );
    }
}

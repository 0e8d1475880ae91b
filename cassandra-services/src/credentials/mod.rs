// SPDX-License-Identifier: AGPL-3.0-or-later
//! SSH credential bootstrap for the backup daemon
//!
//! The backup daemon reaches database pods over SSH. Its key pair is stored
//! in the database itself (`ssh.backup`) so every operator instance finds the
//! same keys, mirrored into the `ssh-keys` secret for the daemon, and the
//! public half is installed in each pod's authorized keys.
//!
//! A bootstrap moves through these phases:
//!
//! ```text
//! Start -> CheckExisting -> Reuse | Generate -> PersistReplication -> PublishSecret -> Propagate -> Done
//! ```
//!
//! Any phase may fail, and the failure names the phase it happened in.

mod keys;
mod propagate;
mod replication;
mod store;

pub use keys::KeyPair;
pub use propagate::{authorized_keys_commands, propagate, SSH_DIR};
pub use replication::ReplicationDescriptor;
pub use store::{
    alter_keyspace, create_keyspace, KeyStore, CREATE_TABLE, INSERT_KEY, PRIVATE_ID, PUBLIC_ID,
    SELECT_KEY,
};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::cluster::{labels, BasicLabels, SecretManifest};
use crate::constants::{
    CASSANDRA_CLUSTER, PASSWORD, ROOT_CERT_PATH, SERVICE, SSH_PRIVATE_KEY, SSH_PUBLIC_KEY,
    SSH_SECRET, USERNAME,
};
use crate::context::ExecutionContext;
use crate::cql::{Consistency, SessionParams};
use crate::error::{Result, ServicesError, VaultError};
use crate::step::Step;

/// Where a bootstrap is, or where it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    Start,
    CheckExisting,
    Reuse,
    Generate,
    PersistReplication,
    PublishSecret,
    Propagate,
    Done,
}

impl BootstrapPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapPhase::Start => "starting",
            BootstrapPhase::CheckExisting => "checking existing keys",
            BootstrapPhase::Reuse => "reusing stored keys",
            BootstrapPhase::Generate => "generating keys",
            BootstrapPhase::PersistReplication => "persisting keys and replication",
            BootstrapPhase::PublishSecret => "publishing keys secret",
            BootstrapPhase::Propagate => "propagating keys",
            BootstrapPhase::Done => "done",
        }
    }
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Generates or recovers the backup key pair and installs it cluster-wide
#[derive(Debug, Clone, Default)]
pub struct SshKeyBootstrapStep;

impl SshKeyBootstrapStep {
    pub fn new() -> Self {
        Self
    }

    /// Admin session parameters for the managed cluster
    async fn session_params(&self, ctx: &ExecutionContext) -> Result<SessionParams> {
        let spec = ctx.spec();
        let secret = ctx
            .cluster()
            .read_secret(ctx.namespace(), &spec.cassandra.secret_name)
            .await?;

        let username = secret
            .get(USERNAME)
            .ok_or_else(|| missing_key(&secret.name, USERNAME))?
            .to_string();
        let stored_password = secret
            .get(PASSWORD)
            .ok_or_else(|| missing_key(&secret.name, PASSWORD))?;

        let password = if spec.vault_registration.enabled {
            let vault = ctx.vault().ok_or(VaultError::NotConfigured)?;
            vault.resolve_password(stored_password).await?
        } else {
            stored_password.to_string()
        };

        Ok(SessionParams {
            host: spec.cassandra_host(ctx.namespace()),
            port: spec.cassandra_port(),
            username,
            password,
            keyspace: "system".to_string(),
            consistency: Consistency::Quorum,
            tls_enabled: spec.tls.enabled,
            root_cert_path: Some(format!("{}{}", ROOT_CERT_PATH, spec.tls.root_ca_file_name)),
        })
    }

    /// Load the stored pair, or generate and store a new one
    async fn settle_keys(
        &self,
        ctx: &ExecutionContext,
        descriptor: &ReplicationDescriptor,
    ) -> Result<KeyPair> {
        let phase = BootstrapPhase::CheckExisting;
        debug!(phase = %phase, "Bootstrap phase");
        let params = self
            .session_params(ctx)
            .await
            .map_err(|e| ServicesError::in_phase(phase.as_str(), e))?;
        let session = ctx
            .sessions()
            .open(&params)
            .await
            .map_err(|e| ServicesError::in_phase(phase.as_str(), e))?;
        let store = KeyStore::new(session.as_ref());

        let existing = store
            .load()
            .await
            .map_err(|e| ServicesError::in_phase(phase.as_str(), e))?;

        let (pair, reused) = match existing {
            Some(pair) => {
                info!(phase = %BootstrapPhase::Reuse, "SSH keys found in database, reusing them");
                (pair, true)
            }
            None => {
                let phase = BootstrapPhase::Generate;
                info!(phase = %phase, "No SSH keys found in database, generating new ones");
                let pair =
                    KeyPair::generate().map_err(|e| ServicesError::in_phase(phase.as_str(), e))?;
                (pair, false)
            }
        };

        let phase = BootstrapPhase::PersistReplication;
        debug!(phase = %phase, reused, "Bootstrap phase");
        let persisted = if reused {
            store.update_replication(descriptor).await
        } else {
            store.store(&pair, descriptor).await
        };
        persisted.map_err(|e| ServicesError::in_phase(phase.as_str(), e))?;

        Ok(pair)
    }

    fn secret_manifest(&self, ctx: &ExecutionContext, pair: &KeyPair) -> SecretManifest {
        let mut string_data = BTreeMap::new();
        string_data.insert(SSH_PUBLIC_KEY.to_string(), pair.public_key.clone());
        string_data.insert(SSH_PRIVATE_KEY.to_string(), pair.private_key.clone());

        SecretManifest {
            name: SSH_SECRET.to_string(),
            labels: BasicLabels {
                app_name: "",
                component: "",
                technology: "",
            }
            .labels(ctx.spec()),
            string_data,
        }
    }
}

#[async_trait]
impl Step for SshKeyBootstrapStep {
    fn name(&self) -> &str {
        "ssh-key-bootstrap"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        debug!(phase = %BootstrapPhase::Start, "Bootstrap phase");
        info!("SSH key bootstrap for backup started");

        let descriptor = ReplicationDescriptor::from_spec(ctx.spec())
            .map_err(|e| ServicesError::in_phase(BootstrapPhase::Start.as_str(), e))?;
        debug!(replication = %descriptor, "Replication calculated");

        let pair = self.settle_keys(ctx, &descriptor).await?;

        let phase = BootstrapPhase::PublishSecret;
        debug!(phase = %phase, "Bootstrap phase");
        let secret = self.secret_manifest(ctx, &pair);
        ctx.cluster()
            .apply_secret(ctx.namespace(), &secret)
            .await
            .map_err(|e| ServicesError::in_phase(phase.as_str(), e))?;

        let phase = BootstrapPhase::Propagate;
        debug!(phase = %phase, "Bootstrap phase");
        let members = ctx
            .cluster()
            .list_pods(ctx.namespace(), &labels([(SERVICE, CASSANDRA_CLUSTER)]))
            .await
            .map_err(|e| ServicesError::in_phase(phase.as_str(), e))?;
        propagate(ctx.shell().as_ref(), &members, &pair.public_key, ctx.retry()).await?;

        debug!(phase = %BootstrapPhase::Done, "Bootstrap phase");
        info!("SSH key bootstrap for backup finished");
        Ok(())
    }
}

fn missing_key(secret: &str, key: &str) -> ServicesError {
    ServicesError::InvalidConfig {
        message: format!("secret '{}' has no '{}' key", secret, key),
    }
}

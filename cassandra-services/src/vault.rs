// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credential vault seam and the secret migration step

use async_trait::async_trait;
use tracing::info;

use crate::constants::{CHARSET, PASSWORD_LENGTH};
use crate::context::ExecutionContext;
use crate::error::{Result, VaultError};
use crate::step::Step;

/// Result type for vault calls
pub type VaultResult<T> = std::result::Result<T, VaultError>;

/// External secret-management system
#[async_trait]
pub trait VaultClient: Send + Sync {
    /// Turn a stored secret value into the effective password
    async fn resolve_password(&self, stored: &str) -> VaultResult<String>;

    /// Move a secret into the vault under a password policy; the secret
    /// resolves through the vault afterwards
    async fn move_secret_to_vault(
        &self,
        namespace: &str,
        secret_name: &str,
        policy_name: &str,
        policy: &str,
    ) -> VaultResult<()>;
}

/// Password generation policy for service credentials
pub fn password_policy() -> String {
    format!(
        "length = {}\nrule \"charset\" {{\n  charset = \"{}\"\n}}\n",
        PASSWORD_LENGTH, CHARSET
    )
}

/// Moves one named secret into the vault
#[derive(Debug, Clone)]
pub struct MoveSecretToVaultStep {
    pub secret_name: String,
    pub policy_name: String,
    pub policy: String,
}

impl MoveSecretToVaultStep {
    pub fn new(secret_name: impl Into<String>, policy_name: impl Into<String>) -> Self {
        Self {
            secret_name: secret_name.into(),
            policy_name: policy_name.into(),
            policy: password_policy(),
        }
    }
}

#[async_trait]
impl Step for MoveSecretToVaultStep {
    fn name(&self) -> &str {
        "move-secret-to-vault"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let vault = ctx.vault().ok_or(VaultError::NotConfigured)?;

        vault
            .move_secret_to_vault(
                ctx.namespace(),
                &self.secret_name,
                &self.policy_name,
                &self.policy,
            )
            .await?;

        info!(
            secret = %self.secret_name,
            policy = %self.policy_name,
            "Secret moved to vault"
        );
        Ok(())
    }
}

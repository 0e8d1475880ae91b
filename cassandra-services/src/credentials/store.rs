// SPDX-License-Identifier: AGPL-3.0-or-later
//! Key pair persistence inside the managed cluster

use tracing::{debug, warn};

use super::keys::KeyPair;
use super::replication::ReplicationDescriptor;
use crate::cql::{CqlResult, CqlSession};
use crate::error::CqlError;

pub const SELECT_KEY: &str = "SELECT id, key FROM ssh.backup WHERE id = ?";
pub const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS ssh.backup (id text PRIMARY KEY, key text)";
pub const INSERT_KEY: &str = "INSERT INTO ssh.backup (id, key) VALUES (?, ?)";

pub const PUBLIC_ID: &str = "public";
pub const PRIVATE_ID: &str = "private";

pub fn create_keyspace(descriptor: &ReplicationDescriptor) -> String {
    format!(
        "CREATE KEYSPACE IF NOT EXISTS ssh WITH REPLICATION = {}",
        descriptor.replication_map()
    )
}

pub fn alter_keyspace(descriptor: &ReplicationDescriptor) -> String {
    format!(
        "ALTER KEYSPACE ssh WITH REPLICATION = {}",
        descriptor.replication_map()
    )
}

/// The `ssh.backup` table, seen through an open session
pub struct KeyStore<'a> {
    session: &'a dyn CqlSession,
}

impl<'a> KeyStore<'a> {
    pub fn new(session: &'a dyn CqlSession) -> Self {
        Self { session }
    }

    /// The stored pair, if both rows are present
    ///
    /// A lone row is reported as absent so both halves get regenerated. A
    /// missing keyspace or table means nothing was stored yet; any other
    /// failure is returned.
    pub async fn load(&self) -> CqlResult<Option<KeyPair>> {
        let public_key = match self.read_key(PUBLIC_ID).await {
            Err(CqlError::SchemaMissing(what)) => {
                debug!(schema = %what, "Key storage does not exist yet");
                return Ok(None);
            }
            other => other?,
        };
        let private_key = self.read_key(PRIVATE_ID).await?;

        match (public_key, private_key) {
            (Some(public_key), Some(private_key)) => Ok(Some(KeyPair {
                public_key,
                private_key,
            })),
            (None, None) => Ok(None),
            _ => {
                warn!("Only one half of the stored key pair was found, regenerating both");
                Ok(None)
            }
        }
    }

    async fn read_key(&self, id: &str) -> CqlResult<Option<String>> {
        let mut cursor = self.session.select(SELECT_KEY, &[id]).await?;
        let row = cursor.next_row().await;

        if let Err(e) = cursor.close().await {
            warn!(id = %id, error = %e, "Failed to close key cursor");
        }

        Ok(row?.and_then(|row| row.get(1).map(str::to_string)))
    }

    /// Create the keyspace and table if absent, then write both rows
    pub async fn store(
        &self,
        pair: &KeyPair,
        descriptor: &ReplicationDescriptor,
    ) -> CqlResult<()> {
        self.session
            .execute(&create_keyspace(descriptor), &[])
            .await?;
        self.session.execute(CREATE_TABLE, &[]).await?;
        self.session
            .execute(INSERT_KEY, &[PUBLIC_ID, pair.public_key.as_str()])
            .await?;
        self.session
            .execute(INSERT_KEY, &[PRIVATE_ID, pair.private_key.as_str()])
            .await?;
        Ok(())
    }

    /// Re-apply the keyspace replication for the current topology
    pub async fn update_replication(&self, descriptor: &ReplicationDescriptor) -> CqlResult<()> {
        self.session
            .execute(&alter_keyspace(descriptor), &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cql::{Consistency, SessionFactory, SessionParams};
    use crate::memory::InMemoryCql;

    fn params() -> SessionParams {
        SessionParams {
            host: "cassandra.cassandra".to_string(),
            port: 9042,
            username: "admin".to_string(),
            password: "admin".to_string(),
            keyspace: "system".to_string(),
            consistency: Consistency::Quorum,
            tls_enabled: false,
            root_cert_path: None,
        }
    }

    #[tokio::test]
    async fn test_missing_schema_means_no_keys() {
        let cql = InMemoryCql::new();
        let session = cql.open(&params()).await.unwrap();
        let loaded = KeyStore::new(session.as_ref()).load().await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_lone_row_means_no_keys() {
        let cql = InMemoryCql::new();
        cql.seed_key(PUBLIC_ID, "ssh-ed25519 AAAA").await;
        let session = cql.open(&params()).await.unwrap();
        let loaded = KeyStore::new(session.as_ref()).load().await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let cql = InMemoryCql::new();
        let session = cql.open(&params()).await.unwrap();
        let store = KeyStore::new(session.as_ref());
        let pair = KeyPair {
            public_key: "ssh-ed25519 AAAA".to_string(),
            private_key: "PRIVATE".to_string(),
        };
        let mut spec = crate::resource::CassandraServicesSpec::default();
        spec.cassandra.deployment_schema.data_centers = vec![crate::resource::DataCenter {
            name: "dc0".to_string(),
            replicas: 3,
            deploy: true,
        }];
        let descriptor = ReplicationDescriptor::from_spec(&spec).unwrap();

        store.store(&pair, &descriptor).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(pair));
        assert_eq!(cql.cursors_open().await, 0);
    }

    #[tokio::test]
    async fn test_other_read_errors_propagate() {
        let cql = InMemoryCql::new();
        cql.fail_reads("read timeout").await;
        let session = cql.open(&params()).await.unwrap();
        let err = KeyStore::new(session.as_ref()).load().await.unwrap_err();
        assert!(matches!(err, CqlError::Statement { .. }));
    }
}

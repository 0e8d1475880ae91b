// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the Cassandra supplementary services operator

use thiserror::Error;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, ServicesError>;

/// Errors that can occur during a reconciliation pass
#[derive(Error, Debug)]
pub enum ServicesError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration or resource
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Resource document could not be parsed
    #[error("Failed to parse resource '{path}': {message}")]
    ResourceParseError { path: String, message: String },

    /// No deploy-enabled data center, so no replication clause can be built
    #[error("Failed to calculate replication parameters: no data center is enabled for deployment")]
    NoReplicationTargets,

    /// Key pair generation failed
    #[error("SSH key generation failed: {message}")]
    KeyGeneration { message: String },

    /// Credential bootstrap failed in a given phase
    #[error("SSH key bootstrap failed while {phase}: {source}")]
    Bootstrap {
        phase: &'static str,
        #[source]
        source: Box<ServicesError>,
    },

    /// A cluster member kept failing the authorized-keys command sequence
    #[error("Command '{command}' failed on '{member}' pod after {attempts} attempts: {message}")]
    PropagationExhausted {
        member: String,
        attempts: u32,
        command: String,
        message: String,
    },

    /// A pipeline step failed and the pass was halted
    #[error("Step '{step}' of service '{service}' failed: {source}")]
    StepFailed {
        service: String,
        step: String,
        #[source]
        source: Box<ServicesError>,
    },

    /// Cluster API failure
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Database session or statement failure
    #[error(transparent)]
    Cql(#[from] CqlError),

    /// Credential vault failure
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Errors reported by the cluster API and the remote command channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        kind: &'static str,
        name: String,
        namespace: String,
    },

    #[error("Cluster API call '{operation}' failed: {message}")]
    Api { operation: String, message: String },

    #[error("Remote command on '{member}' failed: {message}")]
    Exec { member: String, message: String },

    #[error("Timed out after {seconds}s waiting for {what}")]
    Timeout { what: String, seconds: u64 },
}

/// Errors reported by the database session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CqlError {
    /// The session could not be established
    #[error("Failed to create cassandra session to {host}: {message}")]
    Connection { host: String, message: String },

    /// Keyspace or table referenced by a statement does not exist
    #[error("Unconfigured keyspace or table: {0}")]
    SchemaMissing(String),

    /// Any other statement failure
    #[error("Statement '{statement}' failed: {message}")]
    Statement { statement: String, message: String },

    /// Cursor could not be closed cleanly
    #[error("Failed to close cursor: {0}")]
    Close(String),
}

/// Errors reported by the credential vault
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Vault registration is enabled but no vault client is configured")]
    NotConfigured,

    #[error("Failed to resolve password from vault: {0}")]
    Resolve(String),

    #[error("Failed to move secret '{secret}' to vault: {message}")]
    Move { secret: String, message: String },
}

impl ServicesError {
    /// Wrap an error with the bootstrap phase it happened in
    pub fn in_phase(phase: &'static str, source: impl Into<ServicesError>) -> Self {
        ServicesError::Bootstrap {
            phase,
            source: Box::new(source.into()),
        }
    }
}

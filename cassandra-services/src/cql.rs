// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database session seam
//!
//! A thin surface over a CQL driver: open a session at a consistency level,
//! run statements with bound values, and read rows through closable cursors.

use async_trait::async_trait;
use std::fmt;

use crate::error::CqlError;

/// Result type for session calls
pub type CqlResult<T> = std::result::Result<T, CqlError>;

/// Read/write acknowledgment policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    One,
    LocalQuorum,
    Quorum,
    All,
}

impl fmt::Display for Consistency {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consistency::One => write!(formatter, "ONE"),
            Consistency::LocalQuorum => write!(formatter, "LOCAL_QUORUM"),
            Consistency::Quorum => write!(formatter, "QUORUM"),
            Consistency::All => write!(formatter, "ALL"),
        }
    }
}

/// Connection parameters for one session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keyspace: String,
    pub consistency: Consistency,
    pub tls_enabled: bool,
    pub root_cert_path: Option<String>,
}

impl fmt::Debug for SessionParams {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("keyspace", &self.keyspace)
            .field("consistency", &self.consistency)
            .field("tls_enabled", &self.tls_enabled)
            .field("root_cert_path", &self.root_cert_path)
            .finish()
    }
}

/// One result row, columns in select order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub columns: Vec<String>,
}

impl Row {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(String::as_str)
    }
}

/// Cursor over a select result; must be closed by the caller
#[async_trait]
pub trait RowCursor: Send {
    async fn next_row(&mut self) -> CqlResult<Option<Row>>;

    async fn close(self: Box<Self>) -> CqlResult<()>;
}

/// An open session
#[async_trait]
pub trait CqlSession: Send + Sync {
    async fn select(&self, statement: &str, values: &[&str]) -> CqlResult<Box<dyn RowCursor>>;

    async fn execute(&self, statement: &str, values: &[&str]) -> CqlResult<()>;
}

/// Opens sessions to the managed cluster
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, params: &SessionParams) -> CqlResult<Box<dyn CqlSession>>;
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cassandra supplementary services: conditional deployment pipelines
//!
//! Reconciles the services that run next to a Cassandra cluster (the backup
//! daemon, the database-as-a-service adapter, and the conformance test
//! runner) from a single declarative resource.
//!
//! # Features
//!
//! * **Change detection:** Fingerprints the resource and only re-runs the
//!   pipelines whose inputs changed since the last applied snapshot
//! * **Service pipelines:** Ordered steps per service, each with its own
//!   applicability condition
//! * **SSH credential bootstrap:** Keeps one backup key pair per cluster,
//!   stored in the database and installed on every database pod

pub mod cluster;
pub mod config;
pub mod constants;
pub mod context;
pub mod cql;
pub mod credentials;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod reconciler;
pub mod resource;
pub mod services;
pub mod snapshot;
pub mod step;
pub mod steps;
pub mod vault;

pub use config::Config;
pub use context::ExecutionContext;
pub use error::{Result, ServicesError};
pub use reconciler::Reconciler;
pub use resource::CassandraServices;

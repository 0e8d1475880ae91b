// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replication clause for the key storage keyspace

use std::fmt;

use crate::error::{Result, ServicesError};
use crate::resource::CassandraServicesSpec;

/// `'<dc>': '<replicas>'` for every deployed data center
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationDescriptor(String);

impl ReplicationDescriptor {
    /// Build from the deployed data centers, in declaration order
    ///
    /// Fails when no data center is deployed, since the keyspace would have
    /// nowhere to live.
    pub fn from_spec(spec: &CassandraServicesSpec) -> Result<Self> {
        let entries: Vec<String> = spec
            .deployed_data_centers()
            .map(|dc| format!("'{}': '{}'", dc.name, dc.replicas))
            .collect();

        if entries.is_empty() {
            return Err(ServicesError::NoReplicationTargets);
        }

        Ok(Self(entries.join(",")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full replication map for `NetworkTopologyStrategy`
    pub fn replication_map(&self) -> String {
        format!(
            "{{'class' : 'NetworkTopologyStrategy', {} }}",
            self.0
        )
    }
}

impl fmt::Display for ReplicationDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::DataCenter;

    fn spec(dcs: &[(&str, u32, bool)]) -> CassandraServicesSpec {
        let mut spec = CassandraServicesSpec::default();
        spec.cassandra.deployment_schema.data_centers = dcs
            .iter()
            .map(|(name, replicas, deploy)| DataCenter {
                name: name.to_string(),
                replicas: *replicas,
                deploy: *deploy,
            })
            .collect();
        spec
    }

    #[test]
    fn test_descriptor_format() {
        let descriptor =
            ReplicationDescriptor::from_spec(&spec(&[("dc0", 3, true), ("dc1", 2, true)])).unwrap();
        assert_eq!(descriptor.as_str(), "'dc0': '3','dc1': '2'");
        assert_eq!(
            descriptor.replication_map(),
            "{'class' : 'NetworkTopologyStrategy', 'dc0': '3','dc1': '2' }"
        );
    }

    #[test]
    fn test_descriptor_skips_undeployed() {
        let descriptor =
            ReplicationDescriptor::from_spec(&spec(&[("dc0", 3, false), ("dc1", 2, true)])).unwrap();
        assert_eq!(descriptor.to_string(), "'dc1': '2'");
    }

    #[test]
    fn test_descriptor_requires_a_deployed_dc() {
        let err = ReplicationDescriptor::from_spec(&spec(&[("dc0", 3, false)])).unwrap_err();
        assert!(matches!(err, ServicesError::NoReplicationTargets));
        assert!(ReplicationDescriptor::from_spec(&spec(&[])).is_err());
    }
}

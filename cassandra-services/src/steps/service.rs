// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service objects exposing a supplementary service's HTTP API

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use crate::cluster::{labels, BasicLabels, ServiceManifest};
use crate::constants::{APP, CASSANDRA_CLUSTER, MICROSERVICE, NAME};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::services::ServiceKind;
use crate::step::Step;

/// Recreates the service object in front of a deployment
///
/// Updating a service in place is rejected by the API on a stale resource
/// version, so the object is always deleted and created again.
#[derive(Debug, Clone)]
pub struct ServiceStep {
    pub service: ServiceKind,
    pub technology: &'static str,
    pub port: i32,
}

impl ServiceStep {
    pub fn manifest(&self, ctx: &ExecutionContext) -> ServiceManifest {
        let name = self.service.resource_name();
        let mut object_labels = labels([
            (APP, CASSANDRA_CLUSTER),
            (MICROSERVICE, name),
            (NAME, name),
        ]);
        object_labels.extend(
            BasicLabels {
                app_name: name,
                component: "backend",
                technology: self.technology,
            }
            .labels(ctx.spec()),
        );

        let mut ports = BTreeMap::new();
        ports.insert("http".to_string(), self.port);

        ServiceManifest {
            name: name.to_string(),
            labels: object_labels,
            selector: labels([(NAME, name)]),
            ports,
        }
    }
}

#[async_trait]
impl Step for ServiceStep {
    fn name(&self) -> &str {
        "service"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let manifest = self.manifest(ctx);
        ctx.cluster()
            .recreate_service(ctx.namespace(), &manifest)
            .await?;

        debug!(service = %self.service, port = self.port, "Service object created");
        Ok(())
    }
}

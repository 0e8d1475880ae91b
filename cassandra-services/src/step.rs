// SPDX-License-Identifier: AGPL-3.0-or-later
//! The unit of work a pipeline is made of

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::Result;

/// One configuration action of a service pipeline
///
/// Steps hold no state between passes. `condition` must not change
/// anything; everything a step wants later steps to see goes through the
/// context.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Whether the step should run in this pass
    async fn condition(&self, _ctx: &ExecutionContext) -> Result<bool> {
        Ok(true)
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()>;
}

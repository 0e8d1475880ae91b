// SPDX-License-Identifier: AGPL-3.0-or-later
//! Steps shared between service pipelines

mod rollout;
mod service;
mod storage;

pub use rollout::{roll_out, Readiness};
pub use service::ServiceStep;
pub use storage::{CreateStorageClaimsStep, StoreNodesStep};

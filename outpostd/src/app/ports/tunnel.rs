// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use serde_json::Value;

use crate::app::errors::AppResult;
use crate::app::types::WorkloadView;

/// Port forwarding towards a workload started by an outpost.
#[async_trait]
pub trait TunnelPort: Send + Sync {
    async fn establish(&self, workload: &WorkloadView, forward_info: &Value) -> AppResult<()>;
    /// Tears down the forward of `workload`, if there is one.
    async fn close(&self, workload: &WorkloadView) -> AppResult<()>;
}

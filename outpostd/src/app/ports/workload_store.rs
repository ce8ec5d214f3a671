// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{Owner, WorkloadHandle};

/// The host's record store for workloads, keyed by owner name and workload name.
#[async_trait]
pub trait WorkloadStorePort: Send + Sync {
    /// Replaces a previous record with the same owner and name.
    async fn insert(&self, workload: WorkloadHandle) -> AppResult<()>;
    async fn get(&self, owner: &str, name: &str) -> AppResult<Option<WorkloadHandle>>;
    async fn list_for_owner(&self, owner: &Owner) -> AppResult<Vec<WorkloadHandle>>;
    async fn list_all(&self) -> AppResult<Vec<WorkloadHandle>>;
    async fn remove(&self, owner: &str, name: &str) -> AppResult<bool>;
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use serde_json::Value;

use crate::app::errors::AppResult;
use crate::app::types::Owner;

/// Tenant lookups owned by the notebook platform.
#[async_trait]
pub trait OwnerDirectoryPort: Send + Sync {
    /// Resolves the authenticated caller name to a tenant.
    async fn lookup(&self, name: &str) -> AppResult<Owner>;
    /// Maximum number of named workloads; 0 means unlimited.
    async fn named_server_limit(&self, owner: &Owner) -> AppResult<u32>;
    async fn auth_state(&self, owner: &Owner) -> AppResult<Option<Value>>;
}

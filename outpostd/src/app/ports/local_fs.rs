// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AppResult;

/// Local filesystem boundary for the core.
/// Reads TLS material and releases it again when a workload stops.
#[async_trait]
pub trait LocalFilesystemPort: Send + Sync {
    async fn read_to_string(&self, path: &Path) -> AppResult<String>;
    /// Missing files are not an error.
    async fn remove_file(&self, path: &Path) -> AppResult<()>;
    /// Returns false when the directory is missing or not empty.
    async fn remove_dir_if_empty(&self, path: &Path) -> AppResult<bool>;
}

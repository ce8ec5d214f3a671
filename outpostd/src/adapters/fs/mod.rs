// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::LocalFilesystemPort;

#[derive(Clone, Default)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

fn local_error(action: &str, path: &Path, err: std::io::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Internal,
        codes::LOCAL_ERROR,
        format!("failed to {action} {}: {err}", path.display()),
    )
}

#[async_trait]
impl LocalFilesystemPort for LocalFilesystem {
    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "read_to_string", path = %path.display()))]
    async fn read_to_string(&self, path: &Path) -> AppResult<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|err| local_error("read", path, err))
    }

    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "remove_file", path = %path.display()))]
    async fn remove_file(&self, path: &Path) -> AppResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(local_error("remove", path, err)),
        }
    }

    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "remove_dir_if_empty", path = %path.display()))]
    async fn remove_dir_if_empty(&self, path: &Path) -> AppResult<bool> {
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(local_error("list", path, err)),
        };
        if entries
            .next_entry()
            .await
            .map_err(|err| local_error("list", path, err))?
            .is_some()
        {
            return Ok(false);
        }
        tokio::fs::remove_dir(path)
            .await
            .map_err(|err| local_error("remove", path, err))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn removes_files_and_then_the_empty_directory() {
        let dir = TempDir::new().unwrap();
        let certs = dir.path().join("alice-lab");
        std::fs::create_dir_all(&certs).unwrap();
        std::fs::write(certs.join("key.pem"), "key").unwrap();
        let fs = LocalFilesystem::new();

        assert_eq!(fs.read_to_string(&certs.join("key.pem")).await.unwrap(), "key");
        assert!(!fs.remove_dir_if_empty(&certs).await.unwrap());
        fs.remove_file(&certs.join("key.pem")).await.unwrap();
        fs.remove_file(&certs.join("key.pem")).await.unwrap();
        assert!(fs.remove_dir_if_empty(&certs).await.unwrap());
        assert!(!certs.exists());
        assert!(!fs.remove_dir_if_empty(&certs).await.unwrap());
    }

    #[tokio::test]
    async fn reading_a_missing_file_is_a_local_error() {
        let dir = TempDir::new().unwrap();
        let err = LocalFilesystem::new()
            .read_to_string(&dir.path().join("missing.pem"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::LOCAL_ERROR);
    }
}

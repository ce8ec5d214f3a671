// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes, internal};
use crate::app::ports::TunnelPort;
use crate::app::types::WorkloadView;

const STARTUP_GRACE: Duration = Duration::from_millis(500);

/// Forwarding details posted by the outpost once the workload has a node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ForwardTarget {
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub ssh_host: String,
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl ForwardTarget {
    pub fn from_value(value: &Value) -> AppResult<Self> {
        Self::deserialize(value).map_err(|err| tunnel_error(format!("invalid forward info: {err}")))
    }

    fn destination(&self) -> String {
        match &self.ssh_user {
            Some(user) => format!("{user}@{}", self.ssh_host),
            None => self.ssh_host.clone(),
        }
    }
}

fn forward_key(workload: &WorkloadView) -> (String, String) {
    (workload.owner.name.clone(), workload.name.clone())
}

fn tunnel_error(message: impl Into<String>) -> AppError {
    AppError::with_message(AppErrorKind::Internal, codes::TUNNEL_FAILURE, message)
}

/// Opens local port forwards with the system `ssh` client. One child per
/// workload; a new forward for the same workload replaces the old one.
pub struct SshTunnel {
    ssh_binary: String,
    identity_file: Option<PathBuf>,
    startup_grace: Duration,
    children: Mutex<HashMap<(String, String), Child>>,
}

impl SshTunnel {
    pub fn new(ssh_binary: impl Into<String>, identity_file: Option<PathBuf>) -> Self {
        Self {
            ssh_binary: ssh_binary.into(),
            identity_file,
            startup_grace: STARTUP_GRACE,
            children: Mutex::new(HashMap::new()),
        }
    }

    fn children(&self) -> AppResult<MutexGuard<'_, HashMap<(String, String), Child>>> {
        self.children
            .lock()
            .map_err(|_| internal("tunnel registry lock poisoned"))
    }

    fn args(&self, target: &ForwardTarget) -> Vec<String> {
        let mut args = vec![
            "-N".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-L".to_string(),
            format!(
                "{}:{}:{}",
                target.local_port, target.remote_host, target.remote_port
            ),
            "-p".to_string(),
            target.ssh_port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args.push(target.destination());
        args
    }
}

#[async_trait]
impl TunnelPort for SshTunnel {
    async fn establish(&self, workload: &WorkloadView, forward_info: &Value) -> AppResult<()> {
        let target = ForwardTarget::from_value(forward_info)?;
        let args = self.args(&target);
        tracing::debug!(
            owner = %workload.owner.name,
            workload = %workload.name,
            local_port = target.local_port,
            ssh_host = %target.ssh_host,
            "starting ssh forward"
        );

        let mut child = Command::new(&self.ssh_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| tunnel_error(format!("failed to run {}: {err}", self.ssh_binary)))?;

        // A forward that fails exits almost immediately.
        if let Ok(status) = tokio::time::timeout(self.startup_grace, child.wait()).await {
            let status = status.map_err(|err| tunnel_error(format!("ssh wait failed: {err}")))?;
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            return Err(tunnel_error(format!(
                "ssh exited with {status}: {}",
                stderr.trim()
            )));
        }

        let previous = self.children()?.insert(forward_key(workload), child);
        drop(previous);
        Ok(())
    }

    async fn close(&self, workload: &WorkloadView) -> AppResult<()> {
        let Some(mut child) = self.children()?.remove(&forward_key(workload)) else {
            return Ok(());
        };
        tracing::debug!(owner = %workload.owner.name, workload = %workload.name, "closing ssh forward");
        child
            .kill()
            .await
            .map_err(|err| tunnel_error(format!("failed to stop ssh forward: {err}")))
    }
}

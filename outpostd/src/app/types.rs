// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Weak reference to the tenant owning a workload. Only identity, never the
/// tenant record itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    pub id: i64,
    pub name: String,
}

impl Owner {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadState {
    Preparing,
    #[default]
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl WorkloadState {
    fn rank(self) -> u8 {
        match self {
            WorkloadState::Preparing => 0,
            WorkloadState::Starting => 1,
            WorkloadState::Running => 2,
            WorkloadState::Stopping => 3,
            WorkloadState::Stopped | WorkloadState::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkloadState::Stopped | WorkloadState::Failed)
    }

    /// Started on the remote side and not yet torn down.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            WorkloadState::Starting | WorkloadState::Running | WorkloadState::Stopping
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadState::Preparing => "preparing",
            WorkloadState::Starting => "starting",
            WorkloadState::Running => "running",
            WorkloadState::Stopping => "stopping",
            WorkloadState::Stopped => "stopped",
            WorkloadState::Failed => "failed",
        }
    }

    /// Next state when `observed` is reported for a workload currently in
    /// `self`, or `None` when nothing changes. Transitions never move
    /// backwards and terminal states are final. A workload that ends before
    /// it was ever seen running ends as `Failed`.
    pub fn advance(self, observed: WorkloadState) -> Option<WorkloadState> {
        if self.is_terminal() || observed == self {
            return None;
        }
        match observed {
            WorkloadState::Failed => Some(WorkloadState::Failed),
            WorkloadState::Stopped
                if matches!(self, WorkloadState::Preparing | WorkloadState::Starting) =>
            {
                Some(WorkloadState::Failed)
            }
            _ if observed.rank() > self.rank() => Some(observed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub progress: u8,
    pub failed: bool,
    pub ready: bool,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress: progress.min(100),
            failed: false,
            ready: false,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            progress: 100,
            failed: true,
            ready: false,
            message: message.into(),
        }
    }

    pub fn ready(mut self) -> Self {
        self.ready = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPrepareStatus {
    Preparing,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Preparing,
    Spawning,
    Running,
    Stopped,
}

impl From<JobPrepareStatus> for JobStatus {
    fn from(value: JobPrepareStatus) -> Self {
        match value {
            JobPrepareStatus::Preparing => JobStatus::Preparing,
            JobPrepareStatus::Stopped => JobStatus::Stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub status: JobStatus,
    pub logs: Vec<String>,
    pub exit_code: Option<i32>,
}

/// TLS material generated for a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPaths {
    pub keyfile: PathBuf,
    pub certfile: PathBuf,
    pub cafile: Option<PathBuf>,
}

impl CertPaths {
    pub fn entries(&self) -> Vec<(&'static str, &PathBuf)> {
        let mut out = vec![("keyfile", &self.keyfile), ("certfile", &self.certfile)];
        if let Some(cafile) = &self.cafile {
            out.push(("cafile", cafile));
        }
        out
    }
}

/// Configuration snapshot taken when the workload is created.
#[derive(Debug, Clone, Default)]
pub struct WorkloadConfig {
    pub env: BTreeMap<String, String>,
    pub user_options: Map<String, Value>,
    pub misc: Map<String, Value>,
    pub cert_paths: Option<CertPaths>,
    pub trust_bundles: BTreeMap<String, PathBuf>,
    pub poll_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub notebook_dirs: Vec<String>,
    pub deadline: OffsetDateTime,
}

#[derive(Debug, Default)]
pub struct WorkloadRuntime {
    pub state: WorkloadState,
    pub events: Vec<ProgressEvent>,
    pub logs: Vec<String>,
    pub exit_code: Option<i32>,
    pub job_prepare_status: Option<JobPrepareStatus>,
    pub stop_event: Option<ProgressEvent>,
    /// Remote teardown already done; further stops are no-ops.
    pub already_stopped: bool,
    pub stop_pending: bool,
    pub poll_cancel: Option<CancellationToken>,
}

#[derive(Debug)]
pub struct Workload {
    name: String,
    owner: Owner,
    config: WorkloadConfig,
    job: Option<JobSpec>,
    runtime: Mutex<WorkloadRuntime>,
}

pub type WorkloadHandle = Arc<Workload>;

impl Workload {
    pub fn new(name: impl Into<String>, owner: Owner, config: WorkloadConfig) -> Self {
        Self::build(name.into(), owner, config, None, WorkloadState::Starting)
    }

    pub fn new_job(
        name: impl Into<String>,
        owner: Owner,
        config: WorkloadConfig,
        job: JobSpec,
    ) -> Self {
        Self::build(name.into(), owner, config, Some(job), WorkloadState::Preparing)
    }

    fn build(
        name: String,
        owner: Owner,
        config: WorkloadConfig,
        job: Option<JobSpec>,
        initial: WorkloadState,
    ) -> Self {
        let runtime = WorkloadRuntime {
            state: initial,
            ..WorkloadRuntime::default()
        };
        Self {
            name,
            owner,
            config,
            job,
            runtime: Mutex::new(runtime),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    pub fn job(&self) -> Option<&JobSpec> {
        self.job.as_ref()
    }

    pub fn is_job(&self) -> bool {
        self.job.is_some()
    }

    pub fn log_name(&self) -> String {
        format!("{}:{}", self.owner.name, self.name)
    }

    /// Never held across an await point.
    pub fn runtime(&self) -> MutexGuard<'_, WorkloadRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> WorkloadState {
        self.runtime().state
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == WorkloadState::Running
    }

    /// Applies an observed state; returns the new state when it changed.
    pub fn transition(&self, observed: WorkloadState) -> Option<WorkloadState> {
        let mut runtime = self.runtime();
        let next = runtime.state.advance(observed)?;
        runtime.state = next;
        Some(next)
    }

    /// Appends an event, never letting the progress value go down.
    pub fn push_event(&self, mut event: ProgressEvent) {
        let mut runtime = self.runtime();
        if let Some(last) = runtime.events.last() {
            event.progress = event.progress.max(last.progress);
        }
        runtime.events.push(event);
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.runtime().events.clone()
    }

    pub fn last_progress(&self) -> Option<u8> {
        self.runtime().events.last().map(|event| event.progress)
    }

    pub fn view(&self) -> WorkloadView {
        WorkloadView {
            name: self.name.clone(),
            owner: self.owner.clone(),
            user_options: self.config.user_options.clone(),
            misc: self.config.misc.clone(),
            env: self.config.env.clone(),
            state: self.state(),
            is_job: self.is_job(),
        }
    }
}

/// Read-only snapshot handed to hook resolvers.
#[derive(Debug, Clone)]
pub struct WorkloadView {
    pub name: String,
    pub owner: Owner,
    pub user_options: Map<String, Value>,
    pub misc: Map<String, Value>,
    pub env: BTreeMap<String, String>,
    pub state: WorkloadState,
    pub is_job: bool,
}

/// State reported by the outpost's status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStatus {
    pub state: WorkloadState,
    pub exit_code: Option<i32>,
}

#[derive(Debug)]
pub struct ParseRemoteStatusError(pub String);

impl FromStr for RemoteStatus {
    type Err = ParseRemoteStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        if let Ok(code) = value.parse::<i32>() {
            return Ok(RemoteStatus::exited(code));
        }
        let state = match value.as_str() {
            "completed" | "succeeded" => return Ok(RemoteStatus::exited(0)),
            "running" | "ready" => WorkloadState::Running,
            "pending" | "starting" | "spawning" => WorkloadState::Starting,
            "stopping" => WorkloadState::Stopping,
            "stopped" => WorkloadState::Stopped,
            "failed" | "error" => WorkloadState::Failed,
            other => return Err(ParseRemoteStatusError(other.to_string())),
        };
        Ok(RemoteStatus {
            state,
            exit_code: None,
        })
    }
}

impl RemoteStatus {
    pub fn running() -> Self {
        Self {
            state: WorkloadState::Running,
            exit_code: None,
        }
    }

    pub fn exited(code: i32) -> Self {
        Self {
            state: WorkloadState::Stopped,
            exit_code: Some(code),
        }
    }
}

/// Result of one status request after the failure policies were applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No verdict: keep the current state.
    Unknown,
    Observed(RemoteStatus),
}

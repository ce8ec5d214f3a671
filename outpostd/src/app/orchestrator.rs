// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};

use crate::app::controller::WorkloadController;
use crate::app::errors::{AppResult, admission_rejected, forbidden, invalid_argument, not_found};
use crate::app::ports::{
    ClockPort, OwnerDirectoryPort, TelemetryEvent, TelemetryPort, WorkloadStorePort,
};
use crate::app::services::harness::{JOB_COMPLETED_SENTINEL, reduce_logs, render_script};
use crate::app::services::hooks::JobPrepareHook;
use crate::app::services::options::merge_user_options;
use crate::app::services::random::generate_workload_name;
use crate::app::services::tasks::TaskRegistry;
use crate::app::types::{
    JobPrepareStatus, JobSpec, JobStatus, JobStatusReport, Owner, Workload, WorkloadConfig,
    WorkloadHandle, WorkloadState,
};

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub job_server_limit_per_user: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub default_user_options: Map<String, Value>,
    pub allow_named_servers: bool,
    /// Platform API base the job harness polls for its own readiness.
    pub api_url: String,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            job_server_limit_per_user: 10,
            poll_interval: Duration::from_secs(10),
            job_timeout: Duration::from_secs(3600),
            default_user_options: Map::new(),
            allow_named_servers: true,
            api_url: "http://127.0.0.1:8081/hub/api".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateJobInput {
    pub user_options: Map<String, Value>,
    pub notebook_dirs: Vec<String>,
    /// Token the harness uses against the platform API.
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedJob {
    pub owner: String,
    pub name: String,
}

/// Runs time-boxed batch workloads on top of the lifecycle controller.
#[derive(Clone)]
pub struct JobOrchestrator {
    settings: Arc<JobSettings>,
    controller: WorkloadController,
    store: Arc<dyn WorkloadStorePort>,
    owners: Arc<dyn OwnerDirectoryPort>,
    prepare: Option<Arc<dyn JobPrepareHook>>,
    clock: Arc<dyn ClockPort>,
    telemetry: Arc<dyn TelemetryPort>,
    tasks: TaskRegistry,
}

impl JobOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: JobSettings,
        controller: WorkloadController,
        store: Arc<dyn WorkloadStorePort>,
        owners: Arc<dyn OwnerDirectoryPort>,
        prepare: Option<Arc<dyn JobPrepareHook>>,
        clock: Arc<dyn ClockPort>,
        telemetry: Arc<dyn TelemetryPort>,
        tasks: TaskRegistry,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            controller,
            store,
            owners,
            prepare,
            clock,
            telemetry,
            tasks,
        }
    }

    async fn admit(&self, owner: &Owner) -> AppResult<()> {
        let workloads = self.store.list_for_owner(owner).await?;

        if !self.settings.allow_named_servers && workloads.iter().any(|w| w.is_active()) {
            return Err(admission_rejected(
                "User already has a running server, and named servers are not allowed.",
            ));
        }

        let named_limit = self.owners.named_server_limit(owner).await? as usize;
        if named_limit > 0 && workloads.len() >= named_limit {
            return Err(admission_rejected(format!(
                "User {} already has the maximum of {named_limit} named servers. \
                 One must be deleted before a new server can be created",
                owner.name
            )));
        }

        // Counted from live state; concurrent creates may overshoot.
        let running_jobs = workloads
            .iter()
            .filter(|w| w.is_job())
            .filter(|w| {
                let runtime = w.runtime();
                runtime.state.is_active() || runtime.job_prepare_status.is_some()
            })
            .count();
        let limit = self.settings.job_server_limit_per_user;
        if running_jobs >= limit {
            return Err(admission_rejected(format!(
                "User {} already has the maximum of {limit} running jobs. \
                 One must be completed before a new job can be started",
                owner.name
            )));
        }
        Ok(())
    }

    fn job_env(&self, owner: &Owner, name: &str, token: Option<&str>) -> BTreeMap<String, String> {
        let mut env = BTreeMap::from([
            ("JUPYTERHUB_API_URL".to_string(), self.settings.api_url.clone()),
            (
                "JUPYTERHUB_SERVICE_PREFIX".to_string(),
                format!("/user/{}/{name}/", owner.name),
            ),
            ("JUPYTERHUB_USER".to_string(), owner.name.clone()),
            ("JUPYTERHUB_SERVER_NAME".to_string(), name.to_string()),
        ]);
        if let Some(token) = token {
            env.insert("JUPYTERHUB_API_TOKEN".to_string(), token.to_string());
        }
        env
    }

    pub async fn create_job(&self, owner: &Owner, input: CreateJobInput) -> AppResult<CreatedJob> {
        self.admit(owner).await?;

        let mut user_options =
            merge_user_options(input.user_options, &self.settings.default_user_options);
        let Some(option) = user_options.get("option").cloned() else {
            return Err(invalid_argument("Missing 'option' in user_options"));
        };
        user_options.insert("profile".to_string(), option);

        let name = generate_workload_name();
        let mut misc = Map::new();
        misc.insert("cmd".to_string(), json!(["/bin/bash", "-lc"]));
        misc.insert(
            "args".to_string(),
            Value::String(render_script(&input.notebook_dirs)),
        );

        let config = WorkloadConfig {
            env: self.job_env(owner, &name, input.api_token.as_deref()),
            user_options: user_options.clone(),
            misc,
            poll_interval: Some(self.settings.poll_interval),
            ..WorkloadConfig::default()
        };
        let job = JobSpec {
            notebook_dirs: input.notebook_dirs.clone(),
            deadline: self.clock.now_utc() + self.settings.job_timeout,
        };
        let workload: WorkloadHandle =
            Arc::new(Workload::new_job(name.clone(), owner.clone(), config, job));
        workload.runtime().job_prepare_status = Some(JobPrepareStatus::Preparing);
        self.store.insert(Arc::clone(&workload)).await?;

        tracing::info!(
            workload = %workload.log_name(),
            action = "job_start",
            notebook_dirs = ?input.notebook_dirs,
            "{} - Job start",
            workload.log_name()
        );
        let mut event = TelemetryEvent::for_workload(&owner.name, &name);
        event.action = Some("job_start");
        event.detail = Some(Value::Object(user_options).to_string());
        self.telemetry.event("job_start", event);

        let orchestrator = self.clone();
        self.tasks.spawn("job", async move {
            orchestrator.run_job(workload).await;
        });

        Ok(CreatedJob {
            owner: owner.name.clone(),
            name,
        })
    }

    async fn run_job(&self, workload: WorkloadHandle) {
        if let Some(prepare) = &self.prepare {
            if let Err(err) = prepare.prepare(&workload.view()).await {
                tracing::error!("{} - Error in job preparation: {err}", workload.log_name());
                let mut runtime = workload.runtime();
                runtime.job_prepare_status = Some(JobPrepareStatus::Stopped);
                if runtime.logs.is_empty() {
                    runtime.logs = vec![format!("Error in job preparation: {err}")];
                }
                if matches!(runtime.exit_code, None | Some(0)) {
                    runtime.exit_code = Some(-1);
                }
                runtime.state = WorkloadState::Failed;
                runtime.already_stopped = true;
                return;
            }
        }

        if let Err(err) = self.controller.launch(&workload).await {
            tracing::error!("{} - Error spawning job: {err}", workload.log_name());
            let mut runtime = workload.runtime();
            runtime.logs = vec![format!("Error spawning job: {err}")];
            runtime.exit_code = Some(-1);
            runtime.job_prepare_status = Some(JobPrepareStatus::Stopped);
            return;
        }
        workload.runtime().job_prepare_status = None;

        let deadline = workload
            .job()
            .map(|job| job.deadline)
            .unwrap_or_else(|| self.clock.now_utc());
        let remaining = Duration::try_from(deadline - self.clock.now_utc()).unwrap_or_default();
        tokio::time::sleep(remaining).await;
        self.full_stop(&workload).await;
    }

    /// Stops the workload if it is still running and drops its record, unless
    /// the record has been replaced in the meantime.
    async fn full_stop(&self, workload: &WorkloadHandle) {
        let owner = &workload.owner().name;
        let current = match self.store.get(owner, workload.name()).await {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!("{} - could not load record: {err}", workload.log_name());
                return;
            }
        };
        let Some(current) = current else {
            return;
        };
        if !Arc::ptr_eq(&current, workload) {
            return;
        }
        if workload.is_active() {
            tracing::info!(action = "job_stop", "{} - Job stop", workload.log_name());
            let mut event = TelemetryEvent::for_workload(owner, workload.name());
            event.action = Some("job_stop");
            self.telemetry.event("job_stop", event);
            self.controller.stop(workload, false, None).await;
        }
        if let Err(err) = self.store.remove(owner, workload.name()).await {
            tracing::warn!("{} - could not remove record: {err}", workload.log_name());
        }
    }

    pub async fn job_status(
        &self,
        caller: &Owner,
        owner: &str,
        name: &str,
        delete: bool,
    ) -> AppResult<JobStatusReport> {
        if caller.name != owner {
            return Err(forbidden(format!("{} may not read jobs of {owner}", caller.name)));
        }
        let Some(workload) = self.store.get(owner, name).await? else {
            return Err(not_found(format!("job {name} not found")));
        };

        let mut report = {
            let runtime = workload.runtime();
            let active = runtime.state.is_active();
            let status = match runtime.job_prepare_status {
                Some(prepare) if !active => prepare.into(),
                _ if !active => JobStatus::Stopped,
                _ if runtime.state == WorkloadState::Running => JobStatus::Running,
                _ => JobStatus::Spawning,
            };
            let (logs, exit_code) = match status {
                JobStatus::Running | JobStatus::Stopped => {
                    (runtime.logs.clone(), runtime.exit_code)
                }
                _ => (Vec::new(), None),
            };
            JobStatusReport {
                status,
                logs,
                exit_code,
            }
        };

        if report.logs.last().map(String::as_str) == Some(JOB_COMPLETED_SENTINEL) {
            report.logs = reduce_logs(&report.logs);
            report.status = JobStatus::Stopped;
            report.exit_code = Some(0);
        }

        if report.status == JobStatus::Stopped && delete {
            let orchestrator = self.clone();
            let workload = Arc::clone(&workload);
            self.tasks.spawn("job_delete", async move {
                orchestrator.full_stop(&workload).await;
            });
        }

        let mut event = TelemetryEvent::for_workload(owner, name);
        event.action = Some("job_poll");
        event.status = Some(format!("{:?}", report.status).to_lowercase());
        event.exit_code = report.exit_code;
        self.telemetry.event("job_poll", event);

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::{AppError, AppErrorKind};
    use crate::app::ports::{HttpMethod, OutboundResponse};
    use crate::app::types::WorkloadView;
    use crate::testing::{JobFixture, ScriptedTransport};
    use async_trait::async_trait;
    use serde_json::json;

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn lab() -> CreateJobInput {
        CreateJobInput {
            user_options: options(json!({"option": "JupyterLab", "system": "X"})),
            notebook_dirs: vec!["/home/jovyan/work".to_string()],
            api_token: Some("secret".to_string()),
        }
    }

    fn ok(body: &str) -> OutboundResponse {
        OutboundResponse {
            status: 200,
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_job_builds_job_workload() {
        let fixture = JobFixture::new(JobSettings::default());
        let created = fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap();

        assert_eq!(created.owner, "alice");
        assert_eq!(created.name.len(), 32);
        let workload = fixture.store.get("alice", &created.name).await.unwrap().unwrap();
        assert!(workload.is_job());
        assert_eq!(workload.config().user_options["profile"], "JupyterLab");
        assert_eq!(workload.config().misc["cmd"], json!(["/bin/bash", "-lc"]));
        assert_eq!(workload.config().env["JUPYTERHUB_API_TOKEN"], "secret");
        assert_eq!(
            workload.config().env["JUPYTERHUB_SERVICE_PREFIX"],
            format!("/user/alice/{}/", created.name)
        );

        fixture.tasks_settle().await;
        let sent = fixture.transport.requests();
        assert_eq!(sent[0].method, HttpMethod::Post);
        let body: Value = serde_json::from_slice(sent[0].body.as_ref().unwrap()).unwrap();
        assert!(
            body["misc"]["args"]
                .as_str()
                .unwrap()
                .contains("/home/jovyan/work")
        );
    }

    #[tokio::test]
    async fn missing_option_is_rejected() {
        let fixture = JobFixture::new(JobSettings::default());
        let input = CreateJobInput {
            user_options: options(json!({"system": "X"})),
            ..CreateJobInput::default()
        };
        let err = fixture.orchestrator.create_job(&fixture.alice, input).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::InvalidArgument);
        assert_eq!(err.message(), "Missing 'option' in user_options");
        assert!(fixture.store.list_for_owner(&fixture.alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_options_supply_option() {
        let settings = JobSettings {
            default_user_options: options(json!({"option": "small", "x": {"a": 1}})),
            ..JobSettings::default()
        };
        let fixture = JobFixture::new(settings);
        let input = CreateJobInput {
            user_options: options(json!({"x": {"b": 2}})),
            ..CreateJobInput::default()
        };
        let created = fixture.orchestrator.create_job(&fixture.alice, input).await.unwrap();
        let workload = fixture.store.get("alice", &created.name).await.unwrap().unwrap();
        assert_eq!(
            Value::Object(workload.config().user_options.clone()),
            json!({"option": "small", "profile": "small", "x": {"b": 2, "a": 1}})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn job_quota_counts_active_jobs() {
        let settings = JobSettings {
            job_server_limit_per_user: 2,
            ..JobSettings::default()
        };
        let fixture = JobFixture::new(settings);
        let first = fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap();
        fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap();

        let err = fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::AdmissionRejected);
        assert_eq!(
            err.message(),
            "User alice already has the maximum of 2 running jobs. \
             One must be completed before a new job can be started"
        );

        // The first job reports completion and is cleaned up on read.
        fixture.tasks_settle().await;
        let workload = fixture.store.get("alice", &first.name).await.unwrap().unwrap();
        fixture.orchestrator.controller.stop(&workload, false, None).await;
        let report = fixture
            .orchestrator
            .job_status(&fixture.alice, "alice", &first.name, true)
            .await
            .unwrap();
        assert_eq!(report.status, JobStatus::Stopped);
        fixture.tasks_settle().await;

        assert!(fixture.store.get("alice", &first.name).await.unwrap().is_none());
        fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn job_is_stopped_and_removed_at_timeout() {
        let settings = JobSettings {
            job_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(10),
            ..JobSettings::default()
        };
        let fixture = JobFixture::new(settings);
        let created = fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(119)).await;
        let workload = fixture.store.get("alice", &created.name).await.unwrap().unwrap();
        assert!(workload.is_active());

        tokio::time::sleep(Duration::from_secs(2)).await;
        fixture.tasks_settle().await;
        assert!(fixture.store.get("alice", &created.name).await.unwrap().is_none());
        assert!(!workload.is_active());
        let deletes = fixture
            .transport
            .requests()
            .iter()
            .filter(|r| r.method == HttpMethod::Delete)
            .count();
        assert_eq!(deletes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_sentinel_reduces_logs() {
        let fixture = JobFixture::new(JobSettings::default());
        fixture.transport.push_response(ok("{}"));
        fixture.transport.push_response(ok(
            r#"{"status":"running","logs":["boot...","Papermill Job started","a","b","Papermill Job completed"]}"#,
        ));
        let created = fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;

        let report = fixture
            .orchestrator
            .job_status(&fixture.alice, "alice", &created.name, false)
            .await
            .unwrap();
        assert_eq!(report.status, JobStatus::Stopped);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.logs, vec!["a", "b"]);
        assert!(fixture.store.get("alice", &created.name).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_spawning_then_running() {
        let fixture = JobFixture::new(JobSettings::default());
        fixture.transport.push_response(ok("{}"));
        fixture.transport.push_response(ok(r#"{"status":"running","logs":["hello"]}"#));
        let created = fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap();
        fixture.tasks_settle().await;

        let report = fixture
            .orchestrator
            .job_status(&fixture.alice, "alice", &created.name, true)
            .await
            .unwrap();
        assert_eq!(report.status, JobStatus::Spawning);
        assert!(report.logs.is_empty());

        tokio::time::sleep(Duration::from_secs(11)).await;
        let report = fixture
            .orchestrator
            .job_status(&fixture.alice, "alice", &created.name, true)
            .await
            .unwrap();
        assert_eq!(report.status, JobStatus::Running);
        assert_eq!(report.logs, vec!["hello"]);
    }

    #[tokio::test]
    async fn status_checks_owner_and_existence() {
        let fixture = JobFixture::new(JobSettings::default());
        let bob = Owner::new(2, "bob");
        let err = fixture
            .orchestrator
            .job_status(&bob, "alice", "abc", true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Forbidden);
        let err = fixture
            .orchestrator
            .job_status(&fixture.alice, "alice", "abc", true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::NotFound);
    }

    struct FailingPrepare;

    #[async_trait]
    impl JobPrepareHook for FailingPrepare {
        async fn prepare(&self, _workload: &WorkloadView) -> AppResult<()> {
            Err(AppError::with_message(
                AppErrorKind::Internal,
                "prepare_failed",
                "no quota left",
            ))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_prepare_never_contacts_outpost() {
        let fixture = JobFixture::with_prepare(JobSettings::default(), Arc::new(FailingPrepare));
        let created = fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap();
        fixture.tasks_settle().await;

        assert!(fixture.transport.requests().is_empty());
        let report = fixture
            .orchestrator
            .job_status(&fixture.alice, "alice", &created.name, false)
            .await
            .unwrap();
        assert_eq!(report.status, JobStatus::Stopped);
        assert_eq!(report.exit_code, Some(-1));
        assert_eq!(report.logs, vec!["Error in job preparation: no quota left"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_spawn_reports_exit_code() {
        let fixture = JobFixture::new(JobSettings::default());
        fixture.transport.push_failure("connection refused");
        let created = fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let report = fixture
            .orchestrator
            .job_status(&fixture.alice, "alice", &created.name, false)
            .await
            .unwrap();
        assert_eq!(report.status, JobStatus::Stopped);
        assert_eq!(report.exit_code, Some(-1));
        assert!(report.logs[0].starts_with("Error spawning job: connection refused"));
    }

    #[tokio::test]
    async fn named_server_limit_applies() {
        let fixture = JobFixture::with_named_limit(JobSettings::default(), 1);
        fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap();
        let err = fixture.orchestrator.create_job(&fixture.alice, lab()).await.unwrap_err();
        assert!(err.message().contains("maximum of 1 named servers"));
    }
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::app::errors::{AppError, AppErrorKind, AppResult, conflict};
use crate::app::ports::{ClockPort, LocalFilesystemPort, OwnerDirectoryPort, TunnelPort};
use crate::app::services::hooks::{Hook, PostStartHook, StartFailureHook, StartGuard};
use crate::app::services::outpost::{
    OutpostAction, OutpostClient, RemoteEndpoint, StartRequestBody, poll_request, start_request,
    stop_request,
};
use crate::app::services::tasks::TaskRegistry;
use crate::app::types::{
    PollOutcome, ProgressEvent, RemoteStatus, WorkloadHandle, WorkloadState, WorkloadView,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const STOPPING_MESSAGE: &str = "Server is in the process of stopping, please wait.";

/// Per-deployment values that shape the requests sent for every workload.
pub struct WorkloadHooks {
    pub endpoint: RemoteEndpoint,
    /// Merged over the forwarded part of the workload env.
    pub env: Hook<BTreeMap<String, String>>,
    /// Merged over the options the owner supplied.
    pub user_options: Hook<Map<String, Value>>,
    pub misc: Hook<Map<String, Value>>,
    pub port: Hook<u16>,
    pub poll_interval: Hook<Duration>,
    pub check_allowed: Option<Arc<dyn StartGuard>>,
    pub failed_start: Option<Arc<dyn StartFailureHook>>,
    pub post_start: Option<Arc<dyn PostStartHook>>,
}

impl WorkloadHooks {
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        Self {
            endpoint,
            env: Hook::default(),
            user_options: Hook::default(),
            misc: Hook::default(),
            port: Hook::value(8080),
            poll_interval: Hook::value(DEFAULT_POLL_INTERVAL),
            check_allowed: None,
            failed_start: None,
            post_start: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// A 404 from the status endpoint means "no verdict" instead of "gone".
    pub request_404_poll_keep_running: bool,
    /// Any other failed status request means "no verdict".
    pub request_failed_poll_keep_running: bool,
    pub yield_wait: Duration,
    pub misc_disable_default: bool,
    pub env_prefixes: Vec<String>,
    pub internal_ssl: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            request_404_poll_keep_running: true,
            request_failed_poll_keep_running: true,
            yield_wait: Duration::from_secs(1),
            misc_disable_default: false,
            env_prefixes: vec!["JUPYTER_".to_string(), "JUPYTERHUB_".to_string()],
            internal_ssl: false,
        }
    }
}

/// Drives workloads through start, poll and stop against their outpost.
#[derive(Clone)]
pub struct WorkloadController {
    client: OutpostClient,
    hooks: Arc<WorkloadHooks>,
    settings: Arc<ControllerSettings>,
    owners: Arc<dyn OwnerDirectoryPort>,
    fs: Arc<dyn LocalFilesystemPort>,
    tunnel: Arc<dyn TunnelPort>,
    clock: Arc<dyn ClockPort>,
    tasks: TaskRegistry,
}

impl WorkloadController {
    pub fn new(
        client: OutpostClient,
        hooks: WorkloadHooks,
        settings: ControllerSettings,
        owners: Arc<dyn OwnerDirectoryPort>,
        fs: Arc<dyn LocalFilesystemPort>,
        tunnel: Arc<dyn TunnelPort>,
        clock: Arc<dyn ClockPort>,
        tasks: TaskRegistry,
    ) -> Self {
        Self {
            client,
            hooks: Arc::new(hooks),
            settings: Arc::new(settings),
            owners,
            fs,
            tunnel,
            clock,
            tasks,
        }
    }

    pub(crate) fn stamped(&self, message: &str) -> String {
        format!("{}: {message}", self.clock.event_stamp())
    }

    /// Sends the start request. The outpost only confirms the submission;
    /// readiness is discovered by polling.
    pub async fn start(&self, workload: &WorkloadHandle) -> AppResult<Option<Value>> {
        {
            let runtime = workload.runtime();
            if runtime.stop_pending || runtime.already_stopped {
                return Err(conflict(STOPPING_MESSAGE));
            }
        }
        tracing::info!(workload = %workload.log_name(), "start workload");

        if let Some(guard) = &self.hooks.check_allowed {
            if let Err(err) = guard.check(&workload.view()).await {
                self.reject_start(workload, &err);
                return Err(err);
            }
        }

        let options = serde_json::to_string_pretty(&workload.config().user_options)
            .unwrap_or_default();
        workload.push_event(ProgressEvent::new(
            10,
            format!(
                "{} Start {} with options: {options}",
                self.stamped("Sending request to outpost service to start your service."),
                workload.name()
            ),
        ));
        workload.transition(WorkloadState::Starting);

        let view = workload.view();
        match self.send_start(workload, &view).await {
            Ok(response) => {
                let progress = workload.last_progress().unwrap_or(20);
                workload.push_event(ProgressEvent::new(
                    progress,
                    format!(
                        "{} You will receive further information about the service status from the service itself.",
                        self.stamped("Outpost communication successful.")
                    ),
                ));
                if let Some(hook) = &self.hooks.post_start {
                    hook.on_started(&view, response.as_ref()).await?;
                }
                Ok(response)
            }
            Err(err) => {
                tracing::warn!(workload = %workload.log_name(), "start request failed: {err}");
                self.fail_start(workload, &view, &err).await;
                Err(err)
            }
        }
    }

    async fn send_start(
        &self,
        workload: &WorkloadHandle,
        view: &WorkloadView,
    ) -> AppResult<Option<Value>> {
        let body = self.start_body(workload, view).await?;
        let endpoint = self.hooks.endpoint.resolve(view, false).await?;
        let request = start_request(&endpoint, &body)?;
        Ok(self.client.send(request, OutpostAction::Start, view).await?)
    }

    async fn start_body(
        &self,
        workload: &WorkloadHandle,
        view: &WorkloadView,
    ) -> AppResult<StartRequestBody> {
        let mut env: BTreeMap<String, String> = workload
            .config()
            .env
            .iter()
            .filter(|(key, _)| {
                let keep = self
                    .settings
                    .env_prefixes
                    .iter()
                    .any(|prefix| key.starts_with(prefix.as_str()));
                if !keep {
                    tracing::debug!(workload = %workload.log_name(), "removing {key} from env");
                }
                keep
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        env.extend(self.hooks.env.resolve(view).await?);
        env.insert("JUPYTERHUB_USER_ID".to_string(), view.owner.id.to_string());

        let mut user_options = view.user_options.clone();
        user_options.extend(self.hooks.user_options.resolve(view).await?);

        let mut misc = self.hooks.misc.resolve(view).await?;
        misc.extend(view.misc.clone());
        if !self.settings.misc_disable_default {
            let port = self.hooks.port.resolve(view).await?;
            misc.insert("internal_ssl".to_string(), Value::Bool(self.settings.internal_ssl));
            misc.insert("port".to_string(), Value::from(port));
            misc.insert("services_enabled".to_string(), Value::Bool(true));
        }

        let auth_state = self
            .owners
            .auth_state(&view.owner)
            .await?
            .unwrap_or(Value::Null);

        let mut certs = BTreeMap::new();
        let mut internal_trust_bundles = BTreeMap::new();
        if self.settings.internal_ssl {
            if let Some(paths) = &workload.config().cert_paths {
                for (key, path) in paths.entries() {
                    certs.insert(key.to_string(), self.fs.read_to_string(path).await?);
                }
            }
            for (key, path) in &workload.config().trust_bundles {
                internal_trust_bundles.insert(key.clone(), self.fs.read_to_string(path).await?);
            }
        }

        Ok(StartRequestBody {
            name: view.name.clone(),
            env,
            user_options,
            misc,
            auth_state,
            certs,
            internal_trust_bundles,
        })
    }

    /// Finalizes a workload the guard refused. Nothing was sent to the
    /// outpost, so there is nothing to tear down remotely.
    fn reject_start(&self, workload: &WorkloadHandle, err: &AppError) {
        tracing::info!(workload = %workload.log_name(), "start refused: {err}");
        workload.push_event(ProgressEvent::failure(self.stamped(err.message())));
        let mut runtime = workload.runtime();
        if let Some(next) = runtime.state.advance(WorkloadState::Failed) {
            runtime.state = next;
        }
        runtime.already_stopped = true;
    }

    async fn fail_start(&self, workload: &WorkloadHandle, view: &WorkloadView, err: &AppError) {
        workload.push_event(ProgressEvent::new(
            99,
            format!(
                "{} This may take a few seconds.",
                self.stamped("start failed. Deleting related resources...")
            ),
        ));
        tokio::time::sleep(self.settings.yield_wait * 2).await;

        let (summary, details) = match err.kind() {
            AppErrorKind::OutpostRejected | AppErrorKind::Transport => (
                err.context().unwrap_or("Unknown Error").to_string(),
                err.message().to_string(),
            ),
            _ => ("Unknown Error".to_string(), err.to_string()),
        };
        workload.runtime().stop_event = Some(ProgressEvent::failure(format!(
            "{} {details}",
            self.stamped(&summary)
        )));

        if let Some(hook) = &self.hooks.failed_start {
            hook.on_failure(view, err).await;
        }
        self.stop(workload, true, None).await;
    }

    /// Asks the outpost for the workload status and applies the verdict.
    pub async fn poll(&self, workload: &WorkloadHandle) -> PollOutcome {
        let view = workload.view();
        let outcome = self.request_status(workload, &view).await;
        if let PollOutcome::Observed(status) = &outcome {
            self.apply_status(workload, *status);
        }
        outcome
    }

    async fn request_status(&self, workload: &WorkloadHandle, view: &WorkloadView) -> PollOutcome {
        let endpoint = match self.hooks.endpoint.resolve(view, true).await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                tracing::warn!(workload = %workload.log_name(), "could not resolve outpost endpoint: {err}");
                return self.failed_poll(false);
            }
        };

        let body = match self
            .client
            .send(poll_request(&endpoint), OutpostAction::Poll, view)
            .await
        {
            Ok(body) => body,
            Err(err) => return self.failed_poll(err.failure.is_not_found()),
        };

        let Some(Value::Object(body)) = body else {
            return PollOutcome::Observed(RemoteStatus::running());
        };

        if let Some(Value::Array(lines)) = body.get("logs") {
            workload.runtime().logs = lines
                .iter()
                .map(|line| match line {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
        }

        let mut status = match body.get("status") {
            None | Some(Value::Null) => RemoteStatus::running(),
            Some(Value::Number(code)) => match code.as_i64().and_then(|c| i32::try_from(c).ok()) {
                Some(code) => RemoteStatus::exited(code),
                None => {
                    tracing::warn!(workload = %workload.log_name(), "exit code {code} out of range");
                    return PollOutcome::Unknown;
                }
            },
            Some(Value::String(text)) => match text.parse::<RemoteStatus>() {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!(workload = %workload.log_name(), "unknown outpost status '{}'", err.0);
                    return PollOutcome::Unknown;
                }
            },
            Some(other) => {
                tracing::warn!(workload = %workload.log_name(), "unexpected outpost status {other}");
                return PollOutcome::Unknown;
            }
        };
        if let Some(code) = body.get("exit_code").and_then(Value::as_i64) {
            match i32::try_from(code) {
                Ok(code) => status.exit_code = Some(code),
                Err(_) => {
                    tracing::warn!(workload = %workload.log_name(), "exit code {code} out of range");
                    return PollOutcome::Unknown;
                }
            }
        }
        PollOutcome::Observed(status)
    }

    fn failed_poll(&self, not_found: bool) -> PollOutcome {
        if not_found {
            if self.settings.request_404_poll_keep_running {
                PollOutcome::Unknown
            } else {
                PollOutcome::Observed(RemoteStatus::exited(0))
            }
        } else if self.settings.request_failed_poll_keep_running {
            PollOutcome::Unknown
        } else {
            PollOutcome::Observed(RemoteStatus {
                state: WorkloadState::Failed,
                exit_code: None,
            })
        }
    }

    fn apply_status(&self, workload: &WorkloadHandle, status: RemoteStatus) {
        let exit_code = {
            let mut runtime = workload.runtime();
            if let Some(code) = status.exit_code {
                runtime.exit_code = Some(code);
            }
            runtime.exit_code
        };
        // Only a clean exit counts as stopped.
        let observed = match status.state {
            WorkloadState::Stopped if exit_code != Some(0) => WorkloadState::Failed,
            state => state,
        };
        let Some(next) = workload.transition(observed) else {
            return;
        };
        tracing::info!(workload = %workload.log_name(), state = next.as_str(), "workload state changed");
        if next == WorkloadState::Running {
            workload.push_event(ProgressEvent::new(100, self.stamped("Service is running.")).ready());
        }
    }

    /// Starts the periodic status checks. A terminal verdict runs the
    /// regular stop flow so the remote side is always cleaned up.
    pub fn start_polling(&self, workload: &WorkloadHandle) {
        let token = CancellationToken::new();
        if let Some(previous) = workload.runtime().poll_cancel.replace(token.clone()) {
            previous.cancel();
        }

        let controller = self.clone();
        let workload = Arc::clone(workload);
        self.tasks.spawn("poll", async move {
            let interval = match workload.config().poll_interval {
                Some(interval) => interval,
                None => controller
                    .hooks
                    .poll_interval
                    .resolve(&workload.view())
                    .await
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
            };
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                controller.poll(&workload).await;
                if workload.state().is_terminal() {
                    controller.stop(&workload, false, None).await;
                    break;
                }
            }
            tracing::debug!(workload = %workload.log_name(), "polling ended");
        });
    }

    pub fn stop_polling(&self, workload: &WorkloadHandle) {
        if let Some(token) = workload.runtime().poll_cancel.take() {
            token.cancel();
        }
    }

    /// Tears the workload down. Never fails: remote errors are logged and
    /// local state is finalized regardless. Repeated calls do nothing.
    pub async fn stop(&self, workload: &WorkloadHandle, forced: bool, reason: Option<ProgressEvent>) {
        {
            let mut runtime = workload.runtime();
            if runtime.already_stopped || runtime.stop_pending {
                return;
            }
            runtime.stop_pending = true;
        }
        self.stop_polling(workload);
        workload.transition(WorkloadState::Stopping);
        tracing::info!(workload = %workload.log_name(), forced, "stop workload");

        let view = workload.view();
        match self.hooks.endpoint.resolve(&view, true).await {
            Ok(endpoint) => {
                // Failures are reported by the client.
                let _ = self
                    .client
                    .send(stop_request(&endpoint), OutpostAction::Stop, &view)
                    .await;
            }
            Err(err) => {
                tracing::warn!(workload = %workload.log_name(), "could not resolve outpost endpoint: {err}");
            }
        }

        self.release_certs(workload).await;
        if let Err(err) = self.tunnel.close(&view).await {
            tracing::warn!(workload = %workload.log_name(), "could not close tunnel: {err}");
        }

        let mut runtime = workload.runtime();
        let event = reason.or_else(|| runtime.stop_event.take()).unwrap_or_else(|| {
            if runtime.state == WorkloadState::Failed {
                ProgressEvent::failure(self.stamped("Server stopped unexpectedly."))
            } else {
                ProgressEvent::new(100, self.stamped("Server stopped."))
            }
        });
        let terminal = if event.failed {
            WorkloadState::Failed
        } else {
            WorkloadState::Stopped
        };
        if let Some(next) = runtime.state.advance(terminal) {
            runtime.state = next;
        }
        let progress = runtime.events.last().map_or(0, |last| last.progress);
        runtime.events.push(ProgressEvent {
            progress: event.progress.max(progress),
            ..event
        });
        runtime.already_stopped = true;
        runtime.stop_pending = false;
    }

    async fn release_certs(&self, workload: &WorkloadHandle) {
        let Some(paths) = &workload.config().cert_paths else {
            return;
        };
        for path in [&paths.keyfile, &paths.certfile] {
            if let Err(err) = self.fs.remove_file(path).await {
                tracing::warn!(workload = %workload.log_name(), "could not remove {}: {err}", path.display());
            }
        }
        if let Some(dir) = paths.certfile.parent() {
            if let Err(err) = self.fs.remove_dir_if_empty(dir).await {
                tracing::debug!(workload = %workload.log_name(), "could not remove {}: {err}", dir.display());
            }
        }
    }

    /// Opens the port forward the outpost asked for.
    pub async fn open_tunnel(&self, workload: &WorkloadHandle, forward_info: &Value) -> AppResult<()> {
        self.tunnel.establish(&workload.view(), forward_info).await
    }

    /// Start followed by polling. A failure before the outpost was reached
    /// still finalizes the workload.
    pub async fn launch(&self, workload: &WorkloadHandle) -> AppResult<Option<Value>> {
        match self.start(workload).await {
            Ok(response) => {
                self.start_polling(workload);
                Ok(response)
            }
            Err(err) => {
                let finalized = workload.runtime().already_stopped;
                if !finalized {
                    let reason = ProgressEvent::failure(self.stamped(&err.to_string()));
                    self.stop(workload, true, Some(reason)).await;
                }
                Err(err)
            }
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Hand-written fakes shared by the unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use crate::adapters::owners::LocalOwnerDirectory;
use crate::adapters::store::MemoryWorkloadStore;
use crate::app::controller::{ControllerSettings, WorkloadController, WorkloadHooks};
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::orchestrator::{JobOrchestrator, JobSettings};
use crate::app::ports::{
    ClockPort, HttpTransportPort, LocalFilesystemPort, NoopTelemetry, OutboundRequest,
    OutboundResponse, OwnerDirectoryPort, TransportFailure, TunnelPort,
};
use crate::app::services::dispatcher::HttpDispatcher;
use crate::app::services::hooks::JobPrepareHook;
use crate::app::services::outpost::{OutpostClient, RemoteEndpoint};
use crate::app::services::tasks::TaskRegistry;
use crate::app::types::{Owner, WorkloadView};
use crate::app::usecases::UseCases;

pub(crate) const OUTPOST_URL: &str = "http://outpost.test/services";

/// Replays queued outcomes in order and answers `200 {}` once the queue is
/// empty. Every request is recorded.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<OutboundResponse, TransportFailure>>>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn push_response(&self, response: OutboundResponse) {
        self.script.lock().unwrap().push_back(Ok(response));
    }

    pub(crate) fn push_failure(&self, cause: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(TransportFailure(cause.to_string())));
    }

    pub(crate) fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransportPort for ScriptedTransport {
    async fn execute(
        &self,
        request: OutboundRequest,
    ) -> Result<OutboundResponse, TransportFailure> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(OutboundResponse {
                status: 200,
                body: b"{}".to_vec(),
            })
        })
    }
}

pub(crate) struct FixedClock(pub OffsetDateTime);

impl Default for FixedClock {
    fn default() -> Self {
        // 2026-10-14 09:00:00 UTC
        Self(OffsetDateTime::from_unix_timestamp(1_791_968_400).unwrap())
    }
}

impl ClockPort for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.0
    }
}

/// In-memory files. Removals are recorded in call order.
#[derive(Default)]
pub(crate) struct MemoryFs {
    files: Mutex<BTreeMap<PathBuf, String>>,
    removed: Mutex<Vec<PathBuf>>,
}

impl MemoryFs {
    pub(crate) fn insert_file(&self, path: &str, contents: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), contents.to_string());
    }

    pub(crate) fn removed(&self) -> Vec<PathBuf> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalFilesystemPort for MemoryFs {
    async fn read_to_string(&self, path: &Path) -> AppResult<String> {
        self.files.lock().unwrap().get(path).cloned().ok_or_else(|| {
            AppError::with_message(
                AppErrorKind::Internal,
                codes::LOCAL_ERROR,
                format!("failed to read {}", path.display()),
            )
        })
    }

    async fn remove_file(&self, path: &Path) -> AppResult<()> {
        self.files.lock().unwrap().remove(path);
        self.removed.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn remove_dir_if_empty(&self, path: &Path) -> AppResult<bool> {
        let occupied = self
            .files
            .lock()
            .unwrap()
            .keys()
            .any(|file| file.starts_with(path));
        if occupied {
            return Ok(false);
        }
        self.removed.lock().unwrap().push(path.to_path_buf());
        Ok(true)
    }
}

/// Records forward requests and closes; fails every forward once
/// `set_failing` was called.
#[derive(Default)]
pub(crate) struct FakeTunnel {
    fail: AtomicBool,
    calls: Mutex<Vec<Value>>,
    closed: Mutex<Vec<String>>,
}

impl FakeTunnel {
    pub(crate) fn set_failing(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TunnelPort for FakeTunnel {
    async fn establish(&self, _workload: &WorkloadView, forward_info: &Value) -> AppResult<()> {
        self.calls.lock().unwrap().push(forward_info.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::with_message(
                AppErrorKind::Internal,
                codes::TUNNEL_FAILURE,
                "port 40123 already in use",
            ));
        }
        Ok(())
    }

    async fn close(&self, workload: &WorkloadView) -> AppResult<()> {
        self.closed.lock().unwrap().push(workload.name.clone());
        Ok(())
    }
}

fn build_controller(
    transport: Arc<ScriptedTransport>,
    settings: ControllerSettings,
    owners: Arc<dyn OwnerDirectoryPort>,
    tunnel: Arc<dyn TunnelPort>,
    hooks: WorkloadHooks,
    tasks: TaskRegistry,
) -> (WorkloadController, Arc<MemoryFs>) {
    let fs = Arc::new(MemoryFs::default());
    let client = OutpostClient::new(HttpDispatcher::new(transport, 4), Arc::new(NoopTelemetry));
    let controller = WorkloadController::new(
        client,
        hooks,
        settings,
        owners,
        fs.clone(),
        tunnel,
        Arc::new(FixedClock::default()),
        tasks,
    );
    (controller, fs)
}

pub(crate) fn controller_with(
    transport: Arc<ScriptedTransport>,
    settings: ControllerSettings,
) -> (WorkloadController, Arc<MemoryFs>) {
    controller_with_tunnel(transport, settings, Arc::new(FakeTunnel::default()))
}

pub(crate) fn controller_with_tunnel(
    transport: Arc<ScriptedTransport>,
    settings: ControllerSettings,
    tunnel: Arc<FakeTunnel>,
) -> (WorkloadController, Arc<MemoryFs>) {
    build_controller(
        transport,
        settings,
        Arc::new(LocalOwnerDirectory::new(0)),
        tunnel,
        WorkloadHooks::new(RemoteEndpoint::fixed(OUTPOST_URL)),
        TaskRegistry::new(),
    )
}

pub(crate) fn controller_with_hooks(
    transport: Arc<ScriptedTransport>,
    hooks: WorkloadHooks,
) -> WorkloadController {
    let (controller, _) = build_controller(
        transport,
        ControllerSettings::default(),
        Arc::new(LocalOwnerDirectory::new(0)),
        Arc::new(FakeTunnel::default()),
        hooks,
        TaskRegistry::new(),
    );
    controller
}

/// Orchestrator wired to fakes, with `alice` already known to the directory.
pub(crate) struct JobFixture {
    pub(crate) orchestrator: JobOrchestrator,
    pub(crate) controller: WorkloadController,
    pub(crate) store: Arc<MemoryWorkloadStore>,
    pub(crate) owners: Arc<LocalOwnerDirectory>,
    pub(crate) transport: Arc<ScriptedTransport>,
    pub(crate) tunnel: Arc<FakeTunnel>,
    pub(crate) tasks: TaskRegistry,
    pub(crate) alice: Owner,
}

impl JobFixture {
    pub(crate) fn new(settings: JobSettings) -> Self {
        Self::build(settings, None, 0)
    }

    pub(crate) fn with_prepare(settings: JobSettings, prepare: Arc<dyn JobPrepareHook>) -> Self {
        Self::build(settings, Some(prepare), 0)
    }

    pub(crate) fn with_named_limit(settings: JobSettings, limit: u32) -> Self {
        Self::build(settings, None, limit)
    }

    fn build(
        settings: JobSettings,
        prepare: Option<Arc<dyn JobPrepareHook>>,
        named_limit: u32,
    ) -> Self {
        let transport = Arc::new(ScriptedTransport::default());
        let owners = Arc::new(LocalOwnerDirectory::new(named_limit));
        let store = Arc::new(MemoryWorkloadStore::new());
        let tunnel = Arc::new(FakeTunnel::default());
        let tasks = TaskRegistry::new();
        let (controller, _) = build_controller(
            transport.clone(),
            ControllerSettings::default(),
            owners.clone(),
            tunnel.clone(),
            WorkloadHooks::new(RemoteEndpoint::fixed(OUTPOST_URL)),
            tasks.clone(),
        );
        let orchestrator = JobOrchestrator::new(
            settings,
            controller.clone(),
            store.clone(),
            owners.clone(),
            prepare,
            Arc::new(FixedClock::default()),
            Arc::new(NoopTelemetry),
            tasks.clone(),
        );
        Self {
            orchestrator,
            controller,
            store,
            owners,
            transport,
            tunnel,
            tasks,
            alice: Owner::new(1, "alice"),
        }
    }

    /// Registers `alice` so lookups through the directory return id 1.
    pub(crate) async fn register_alice(&self) {
        let owner = self.owners.lookup("alice").await.unwrap();
        assert_eq!(owner, self.alice);
    }

    pub(crate) fn usecases(&self) -> UseCases {
        UseCases::new(
            self.orchestrator.clone(),
            self.controller.clone(),
            self.store.clone(),
            self.owners.clone(),
            self.tasks.clone(),
        )
    }

    /// Lets spawned tasks run up to their next timer.
    pub(crate) async fn tasks_settle(&self) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

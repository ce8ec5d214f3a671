// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use serde_json::Value;

use crate::app::controller::WorkloadController;
use crate::app::errors::{AppResult, conflict, invalid_argument, not_found};
use crate::app::orchestrator::{CreateJobInput, CreatedJob, JobOrchestrator};
use crate::app::ports::{OwnerDirectoryPort, WorkloadStorePort};
use crate::app::services::tasks::TaskRegistry;
use crate::app::types::{JobStatusReport, ProgressEvent};

/// Entry points used by the REST adapter.
#[derive(Clone)]
pub struct UseCases {
    pub(crate) orchestrator: JobOrchestrator,
    pub(crate) controller: WorkloadController,
    pub(crate) store: Arc<dyn WorkloadStorePort>,
    pub(crate) owners: Arc<dyn OwnerDirectoryPort>,
    pub(crate) tasks: TaskRegistry,
}

impl UseCases {
    pub fn new(
        orchestrator: JobOrchestrator,
        controller: WorkloadController,
        store: Arc<dyn WorkloadStorePort>,
        owners: Arc<dyn OwnerDirectoryPort>,
        tasks: TaskRegistry,
    ) -> Self {
        Self {
            orchestrator,
            controller,
            store,
            owners,
            tasks,
        }
    }

    pub async fn create_job(&self, caller: &str, input: CreateJobInput) -> AppResult<CreatedJob> {
        let owner = self.owners.lookup(caller).await?;
        self.orchestrator.create_job(&owner, input).await
    }

    pub async fn job_status(
        &self,
        caller: &str,
        owner: &str,
        name: &str,
        delete: bool,
    ) -> AppResult<JobStatusReport> {
        let caller = self.owners.lookup(caller).await?;
        self.orchestrator.job_status(&caller, owner, name, delete).await
    }

    /// Opens the tunnel the outpost reported forwarding details for. A failed tunnel stops the workload in the background; the
    /// request itself still succeeds.
    pub async fn setup_tunnel(
        &self,
        owner: &str,
        name: &str,
        forward_info: Option<Value>,
    ) -> AppResult<()> {
        let Some(workload) = self.store.get(owner, name).await? else {
            return Err(not_found(format!("workload {owner}:{name} not found")));
        };
        if workload.runtime().stop_pending {
            tracing::debug!(workload = %workload.log_name(), "tunnel setup while stopping");
            return Err(conflict("Bad Request."));
        }
        let forward_info = match forward_info {
            Some(Value::Object(map)) if !map.is_empty() => Value::Object(map),
            _ => return Err(invalid_argument("Bad Request.")),
        };

        tracing::debug!(workload = %workload.log_name(), action = "setuptunnel", "setting up tunnel");
        if let Err(err) = self.controller.open_tunnel(&workload, &forward_info).await {
            tracing::error!(
                workload = %workload.log_name(),
                action = "tunnelfailed",
                "could not setup tunnel for {}: {err}",
                workload.log_name()
            );
            let event = ProgressEvent::failure(format!(
                "{} {err}",
                self.controller.stamped("Could not setup tunnel")
            ));
            let controller = self.controller.clone();
            self.tasks.spawn("tunnel_stop", async move {
                controller.stop(&workload, true, Some(event)).await;
            });
        }
        Ok(())
    }

    /// Stops every active workload so no remote resource outlives the
    /// process. Returns how many were stopped.
    pub async fn shutdown(&self) -> AppResult<usize> {
        let workloads = self.store.list_all().await?;
        let mut stopped = 0;
        for workload in workloads.iter().filter(|w| w.is_active()) {
            tracing::info!(workload = %workload.log_name(), "stopping workload on shutdown");
            self.controller.stop(workload, false, None).await;
            stopped += 1;
        }
        Ok(stopped)
    }
}

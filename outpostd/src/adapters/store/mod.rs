// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::app::errors::{AppResult, internal};
use crate::app::ports::WorkloadStorePort;
use crate::app::types::{Owner, WorkloadHandle};

type Key = (String, String);

/// Process-local record store. Records live as long as the daemon.
#[derive(Clone, Default)]
pub struct MemoryWorkloadStore {
    records: Arc<Mutex<HashMap<Key, WorkloadHandle>>>,
}

impl MemoryWorkloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(
        &self,
        f: impl FnOnce(&mut HashMap<Key, WorkloadHandle>) -> T,
    ) -> AppResult<T> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| internal("workload store lock poisoned"))?;
        Ok(f(&mut records))
    }
}

#[async_trait]
impl WorkloadStorePort for MemoryWorkloadStore {
    async fn insert(&self, workload: WorkloadHandle) -> AppResult<()> {
        let key = (workload.owner().name.clone(), workload.name().to_string());
        self.with_records(|records| {
            records.insert(key, workload);
        })
    }

    async fn get(&self, owner: &str, name: &str) -> AppResult<Option<WorkloadHandle>> {
        self.with_records(|records| {
            records
                .get(&(owner.to_string(), name.to_string()))
                .cloned()
        })
    }

    async fn list_for_owner(&self, owner: &Owner) -> AppResult<Vec<WorkloadHandle>> {
        self.with_records(|records| {
            let mut found: Vec<WorkloadHandle> = records
                .iter()
                .filter(|((owner_name, _), _)| owner_name == &owner.name)
                .map(|(_, workload)| workload.clone())
                .collect();
            found.sort_by(|a, b| a.name().cmp(b.name()));
            found
        })
    }

    async fn list_all(&self) -> AppResult<Vec<WorkloadHandle>> {
        self.with_records(|records| records.values().cloned().collect())
    }

    async fn remove(&self, owner: &str, name: &str) -> AppResult<bool> {
        self.with_records(|records| {
            records
                .remove(&(owner.to_string(), name.to_string()))
                .is_some()
        })
    }
}

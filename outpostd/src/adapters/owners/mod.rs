// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::app::errors::{AppResult, internal, invalid_argument};
use crate::app::ports::OwnerDirectoryPort;
use crate::app::types::Owner;

/// Owners known to this process. Ids are handed out in first-seen order
/// and the named-server limit is the same for everyone.
pub struct LocalOwnerDirectory {
    named_server_limit: u32,
    ids: Mutex<HashMap<String, i64>>,
}

impl LocalOwnerDirectory {
    pub fn new(named_server_limit: u32) -> Self {
        Self {
            named_server_limit,
            ids: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl OwnerDirectoryPort for LocalOwnerDirectory {
    async fn lookup(&self, name: &str) -> AppResult<Owner> {
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid_argument("owner name must not be empty"));
        }
        let mut ids = self
            .ids
            .lock()
            .map_err(|_| internal("owner directory lock poisoned"))?;
        let next = ids.len() as i64 + 1;
        let id = *ids.entry(name.to_string()).or_insert(next);
        Ok(Owner::new(id, name))
    }

    async fn named_server_limit(&self, _owner: &Owner) -> AppResult<u32> {
        Ok(self.named_server_limit)
    }

    async fn auth_state(&self, _owner: &Owner) -> AppResult<Option<Value>> {
        Ok(None)
    }
}

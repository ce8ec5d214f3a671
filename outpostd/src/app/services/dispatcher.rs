// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::app::ports::{HttpTransportPort, OutboundRequest, OutboundResponse, TransportFailure};

pub const DEFAULT_CONCURRENCY_LIMIT: usize = 10;

/// Process-wide gate in front of the shared HTTP transport. Every outbound
/// call to any outpost holds one permit for its whole duration.
#[derive(Clone)]
pub struct HttpDispatcher {
    transport: Arc<dyn HttpTransportPort>,
    permits: Arc<Semaphore>,
    limit: usize,
}

impl HttpDispatcher {
    pub fn new(transport: Arc<dyn HttpTransportPort>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            transport,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn fetch(
        &self,
        request: OutboundRequest,
    ) -> Result<OutboundResponse, TransportFailure> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TransportFailure("http dispatcher is closed".to_string()))?;
        tracing::trace!(
            method = %request.method,
            available = self.permits.available_permits(),
            "dispatching outpost request"
        );
        self.transport.execute(request).await
    }
}

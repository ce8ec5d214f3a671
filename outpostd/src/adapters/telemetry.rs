// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::{TelemetryEvent, TelemetryPort};

#[derive(Clone, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryPort for TracingTelemetry {
    fn event(&self, name: &'static str, fields: TelemetryEvent) {
        let TelemetryEvent {
            owner,
            workload,
            action,
            status,
            exit_code,
            duration,
            detail,
        } = fields;

        tracing::info!(
            target: "outpostd::telemetry",
            event = name,
            owner = owner.as_deref(),
            workload = workload.as_deref(),
            action = action,
            status = status.as_deref(),
            exit_code = exit_code,
            duration_ms = duration.map(|d| d.as_millis() as u64),
            detail = detail.as_deref(),
        );
    }
}

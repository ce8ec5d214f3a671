// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct TelemetryEvent {
    pub owner: Option<String>,
    pub workload: Option<String>,
    pub action: Option<&'static str>,
    pub status: Option<String>,
    pub exit_code: Option<i32>,
    pub duration: Option<Duration>,
    pub detail: Option<String>,
}

impl TelemetryEvent {
    pub fn for_workload(owner: &str, workload: &str) -> Self {
        Self {
            owner: Some(owner.to_string()),
            workload: Some(workload.to_string()),
            ..Self::default()
        }
    }
}

pub trait TelemetryPort: Send + Sync {
    fn event(&self, name: &'static str, fields: TelemetryEvent);
}

// Dummy telemetry port for tests.
#[derive(Clone, Default)]
pub struct NoopTelemetry;

impl TelemetryPort for NoopTelemetry {
    fn event(&self, _name: &'static str, _fields: TelemetryEvent) {}
}

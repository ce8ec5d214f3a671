// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod http_transport;
pub mod local_fs;
pub mod owner_directory;
pub mod telemetry;
pub mod tunnel;
pub mod workload_store;

pub use clock::ClockPort;
pub use http_transport::{
    HttpMethod, HttpTransportPort, OutboundRequest, OutboundResponse, TransportFailure,
};
pub use local_fs::LocalFilesystemPort;
pub use owner_directory::OwnerDirectoryPort;
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetryPort};
pub use tunnel::TunnelPort;
pub use workload_store::WorkloadStorePort;

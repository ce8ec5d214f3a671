// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod api;
pub mod cli;
pub mod fs;
pub mod http;
pub mod owners;
pub mod store;
pub mod telemetry;
pub mod time;
pub mod tunnel;

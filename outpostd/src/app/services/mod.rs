// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod dispatcher;
pub mod harness;
pub mod hooks;
pub mod options;
pub mod outpost;
pub mod random;
pub mod tasks;

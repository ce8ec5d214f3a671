// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

/// Time source boundary for UTC timestamps.
/// Makes deadlines and event messages deterministic in tests.
pub trait ClockPort: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;

    /// `YYYY_MM_DD HH:MM:SS.mmm`, the prefix of every progress message.
    fn event_stamp(&self) -> String {
        let now = self.now_utc();
        format!(
            "{:04}_{:02}_{:02} {:02}:{:02}:{:02}.{:03}",
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.millisecond()
        )
    }
}

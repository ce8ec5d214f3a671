// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::ClockPort;
use time::OffsetDateTime;

/// Wall clock; progress stamps and job deadlines are taken in UTC.
#[derive(Clone, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl ClockPort for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_stamp_has_millisecond_precision() {
        let stamp = SystemClock::new().event_stamp();
        // 2026_10_14 09:05:03.123
        assert_eq!(stamp.len(), 23);
        assert_eq!(&stamp[4..5], "_");
        assert_eq!(&stamp[19..20], ".");
    }
}

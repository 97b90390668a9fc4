// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Unix-timestamp-to-calendar-date formatting, shared by every caller that needs a daily bucket
//! key or a display date, via `sqlx`'s own `time` feature rather than a standalone date crate.

use crate::domain::Timestamp;
use sqlx::types::time::OffsetDateTime;

/// `YYYY-MM-DD`, for display (e.g. the dashboard's snapshot history).
pub fn civil_date(ts: Timestamp) -> String {
    let date = OffsetDateTime::from_unix_timestamp(ts).unwrap_or(OffsetDateTime::UNIX_EPOCH).date();
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

/// `YYYYMMDD`, for storage keys (e.g. `usage_daily.date`).
pub fn usage_date_key(ts: Timestamp) -> String {
    let date = OffsetDateTime::from_unix_timestamp(ts).unwrap_or(OffsetDateTime::UNIX_EPOCH).date();
    format!("{:04}{:02}{:02}", date.year(), u8::from(date.month()), date.day())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_formats_as_1970_01_01() {
        assert_eq!(civil_date(0), "1970-01-01");
        assert_eq!(usage_date_key(0), "19700101");
    }

    #[test]
    fn known_date_round_trips() {
        // 2024-01-01T00:00:00Z
        assert_eq!(civil_date(1_704_067_200), "2024-01-01");
        assert_eq!(usage_date_key(1_704_067_200), "20240101");
    }
}

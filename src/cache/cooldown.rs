//! Cooldown timestamps keyed by a UUID-like id.
//!
//! The value column holds the absolute expiry as milliseconds since the Unix
//! epoch. `-1` means no cooldown was ever set.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::expiration::ExpirationAction;
use super::kv::KvStorage;
use super::resolver::{ColumnKind, ColumnValue, SchemaResolver};
use crate::database::Connection;
use crate::error::{AsyncSqlError, Result};

pub const ID_COLUMN: &str = "UUID";
pub const COOLDOWN_COLUMN: &str = "Cooldown";
/// Stored when an id has no cooldown
pub const NO_COOLDOWN: i64 = -1;

const COLUMN_DEFINITIONS: &str = "`UUID` varchar(36), `Cooldown` BIGINT";

#[derive(Clone, Debug)]
pub struct CooldownStorage {
    kv: KvStorage,
}

impl CooldownStorage {
    /// Open (creating when absent) the cooldown table `table_name`.
    /// Expired rows are re-downloaded.
    pub fn create(ttl: Option<Duration>, connection: &Connection, table_name: &str) -> Result<Self> {
        let table = connection.create_table(table_name, COLUMN_DEFINITIONS)?;
        let resolver = SchemaResolver::new()
            .column(ID_COLUMN, ColumnKind::Text)
            .column(COOLDOWN_COLUMN, ColumnKind::Long);

        Ok(Self {
            kv: KvStorage::new(
                table,
                ID_COLUMN,
                COOLDOWN_COLUMN,
                Arc::new(resolver),
                ExpirationAction::Download,
                ttl,
            ),
        })
    }

    pub fn storage(&self) -> &KvStorage {
        &self.kv
    }

    /// `now >= stored expiry`. An id without a cooldown is expired.
    pub fn is_expired(&self, id: &str) -> Result<bool> {
        Ok(now_millis() >= self.get_cooldown(id)?)
    }

    /// Store `now + duration` and upload it
    pub fn set_cooldown(&self, id: &str, duration: Duration) -> Result<()> {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.kv.set(id, ColumnValue::Long(now_millis().saturating_add(millis)))?;
        Ok(())
    }

    pub fn remove_cooldown(&self, id: &str) {
        self.kv.remove(id);
    }

    /// Absolute expiry in epoch milliseconds, or [`NO_COOLDOWN`].
    ///
    /// A miss inserts the [`NO_COOLDOWN`] row.
    pub fn get_cooldown(&self, id: &str) -> Result<i64> {
        let value = self.kv.get_or_default(id, ColumnValue::Long(NO_COOLDOWN))?;
        value.as_i64().ok_or_else(|| AsyncSqlError::InvalidValue {
            column: COOLDOWN_COLUMN.to_string(),
            reason: format!("expected epoch milliseconds, got {value:?}"),
        })
    }

    /// `stored expiry - now`; negative once the cooldown has passed
    pub fn get_time_left(&self, id: &str) -> Result<i64> {
        Ok(self.get_cooldown(id)? - now_millis())
    }

    /// Substitute `{milliseconds}`, `{seconds}`, `{minutes}`, `{hours}`,
    /// `{days}`, `{weeks}`, `{months}` and `{years}` in `template`.
    ///
    /// A month is 4 weeks and a year 12 such months. Negative input is
    /// reported in `{milliseconds}` with every other unit zero.
    ///
    /// ```rust
    /// use asyncsql_core::cache::CooldownStorage;
    ///
    /// let text = CooldownStorage::format_time_left("{hours}h{minutes}m{seconds}s", 3_725_000);
    /// assert_eq!(text, "1h2m5s");
    /// ```
    pub fn format_time_left(template: &str, time_left_ms: i64) -> String {
        let parts = TimeParts::split(time_left_ms);
        template
            .replace("{milliseconds}", &parts.milliseconds.to_string())
            .replace("{seconds}", &parts.seconds.to_string())
            .replace("{minutes}", &parts.minutes.to_string())
            .replace("{hours}", &parts.hours.to_string())
            .replace("{days}", &parts.days.to_string())
            .replace("{weeks}", &parts.weeks.to_string())
            .replace("{months}", &parts.months.to_string())
            .replace("{years}", &parts.years.to_string())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct TimeParts {
    milliseconds: i64,
    seconds: i64,
    minutes: i64,
    hours: i64,
    days: i64,
    weeks: i64,
    months: i64,
    years: i64,
}

impl TimeParts {
    fn split(total_ms: i64) -> Self {
        if total_ms < 0 {
            return Self {
                milliseconds: total_ms,
                ..Self::default()
            };
        }
        let seconds = total_ms / 1000;
        let minutes = seconds / 60;
        let hours = minutes / 60;
        let days = hours / 24;
        let weeks = days / 7;
        let months = weeks / 4;
        Self {
            milliseconds: total_ms % 1000,
            seconds: seconds % 60,
            minutes: minutes % 60,
            hours: hours % 24,
            days: days % 7,
            weeks: weeks % 4,
            months: months % 12,
            years: months / 12,
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hours_minutes_seconds() {
        assert_eq!(
            CooldownStorage::format_time_left("{hours}h{minutes}m{seconds}s", 3_725_000),
            "1h2m5s"
        );
    }

    #[test]
    fn test_years_come_from_months() {
        // 13 months of 28 days, plus 1.5 seconds
        let ms = 13 * 28 * 24 * 60 * 60 * 1000 + 1_500;
        let parts = TimeParts::split(ms);
        assert_eq!(parts.years, 1);
        assert_eq!(parts.months, 1);
        assert_eq!(parts.weeks, 0);
        assert_eq!(parts.seconds, 1);
        assert_eq!(parts.milliseconds, 500);
    }

    #[test]
    fn test_negative_input_stays_in_milliseconds() {
        assert_eq!(
            CooldownStorage::format_time_left("{milliseconds}|{seconds}|{years}", -2_500),
            "-2500|0|0"
        );
    }

    #[test]
    fn test_unknown_placeholders_are_left_alone() {
        assert_eq!(
            CooldownStorage::format_time_left("{days}d {fortnights}", 86_400_000),
            "1d {fortnights}"
        );
    }

    proptest! {
        #[test]
        fn test_parts_recompose_to_input(total in 0i64..10_000_000_000_000) {
            let p = TimeParts::split(total);
            let months = p.months + 12 * p.years;
            let weeks = p.weeks + 4 * months;
            let days = p.days + 7 * weeks;
            let hours = p.hours + 24 * days;
            let minutes = p.minutes + 60 * hours;
            let seconds = p.seconds + 60 * minutes;
            prop_assert_eq!(p.milliseconds + 1000 * seconds, total);
            prop_assert!(p.seconds < 60 && p.minutes < 60 && p.hours < 24);
            prop_assert!(p.days < 7 && p.weeks < 4 && p.months < 12);
        }
    }
}

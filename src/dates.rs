use chrono::{DateTime, Duration, FixedOffset, Local, SecondsFormat, TimeZone};

pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;
pub const MAX_LOOKBACK_DAYS: u32 = 31;

/// Closed query window `[now - lookback, now]`, each bound carrying the UTC
/// offset that was in effect locally at that instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl DateRange {
    pub fn trailing_from_now(lookback: Duration) -> Result<Self, String> {
        Self::trailing(Local::now(), lookback)
    }

    pub fn trailing<Tz: TimeZone>(now: DateTime<Tz>, lookback: Duration) -> Result<Self, String> {
        if lookback < Duration::zero() {
            return Err(format!(
                "Lookback must not be negative (got {}s).",
                lookback.num_seconds()
            ));
        }
        let start = now
            .clone()
            .checked_sub_signed(lookback)
            .ok_or_else(|| "Lookback reaches before the representable date range.".to_string())?;
        Ok(Self {
            start: start.fixed_offset(),
            end: now.fixed_offset(),
        })
    }

    /// Bounds as ISO-8601 with whole seconds and an explicit numeric offset,
    /// e.g. `2026-02-03T09:15:00+01:00`.
    pub fn as_iso8601(&self) -> (String, String) {
        (
            self.start.to_rfc3339_opts(SecondsFormat::Secs, false),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, false),
        )
    }

    pub fn label(&self) -> String {
        format!(
            "{} → {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

pub fn lookback_from_days(days: u32) -> Duration {
    Duration::days(i64::from(days))
}

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartDateFormat {
    Day,        // 2024-01-12
    HourMin,    // 2024-01-12 10:30
    HourMinSec, // 2024-01-12 10:30:15
}

/// Picks the label granularity that matches a bar interval (in seconds).
pub fn format_for_interval(interval_sec: i64) -> SmartDateFormat {
    const MINUTE: i64 = 60;
    const DAY: i64 = 24 * 3600;

    if interval_sec >= DAY {
        SmartDateFormat::Day
    } else if interval_sec >= MINUTE {
        SmartDateFormat::HourMin
    } else {
        SmartDateFormat::HourMinSec
    }
}

/// Formats a unix timestamp (seconds) in `tz`.
pub fn format_timestamp(seconds: i64, format: SmartDateFormat, tz: Tz) -> String {
    let dt = match Utc.timestamp_opt(seconds, 0) {
        chrono::LocalResult::Single(d) => d.with_timezone(&tz),
        chrono::LocalResult::Ambiguous(d, _) => d.with_timezone(&tz),
        chrono::LocalResult::None => return seconds.to_string(),
    };

    match format {
        SmartDateFormat::Day => dt.format("%Y-%m-%d").to_string(),
        SmartDateFormat::HourMin => dt.format("%Y-%m-%d %H:%M").to_string(),
        SmartDateFormat::HourMinSec => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_follows_interval_and_timezone() {
        // 2024-01-12 10:30:15 UTC
        let ts = 1_705_055_415;
        assert_eq!(format_for_interval(60), SmartDateFormat::HourMin);
        assert_eq!(format_for_interval(86_400), SmartDateFormat::Day);
        assert_eq!(
            format_timestamp(ts, SmartDateFormat::HourMinSec, chrono_tz::UTC),
            "2024-01-12 10:30:15"
        );
        assert_eq!(
            format_timestamp(ts, SmartDateFormat::HourMin, chrono_tz::Asia::Tokyo),
            "2024-01-12 19:30"
        );
    }
}

//! Parsing of `--at` start times.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Days, Local, NaiveDateTime, NaiveTime, TimeZone};

const DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

/// Accepts RFC 3339, a local "YYYY-MM-DD HH:MM[:SS]", or a bare "HH:MM[:SS]"
/// meaning its next occurrence.
pub fn parse_start_time(input: &str) -> Result<DateTime<Local>> {
    parse_start_time_from(input, Local::now())
}

fn parse_start_time_from(input: &str, now: DateTime<Local>) -> Result<DateTime<Local>> {
    let input = input.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Ok(at.with_timezone(&Local));
    }
    for format in DATE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return local(naive);
        }
    }
    for format in TIME_FORMATS {
        if let Ok(time) = NaiveTime::parse_from_str(input, format) {
            let today = local(now.date_naive().and_time(time))?;
            if today > now {
                return Ok(today);
            }
            let tomorrow = now
                .date_naive()
                .checked_add_days(Days::new(1))
                .ok_or_else(|| anyhow!("date out of range"))?;
            return local(tomorrow.and_time(time));
        }
    }
    bail!(
        "unrecognized start time {:?} (use HH:MM, \"YYYY-MM-DD HH:MM\" or RFC 3339)",
        input
    )
}

fn local(naive: NaiveDateTime) -> Result<DateTime<Local>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| anyhow!("{} does not exist in the local time zone", naive))
}

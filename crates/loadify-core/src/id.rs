//! Time-derived identifiers for transfer items and scheduled jobs.
//!
//! Ids are unix milliseconds at creation, bumped so they stay strictly
//! increasing within the process even when several are minted in the same
//! millisecond. That keeps them unique and orderable for debugging.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

static LAST_ID: AtomicU64 = AtomicU64::new(0);

fn next_time_id() -> u64 {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let prev = LAST_ID
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(prev + 1)
}

/// Error returned when an id string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id: {0:?}")]
pub struct ParseIdError(pub String);

fn parse_prefixed(s: &str, prefix: &str) -> Result<u64, ParseIdError> {
    let trimmed = s.trim();
    let digits = trimmed.strip_prefix(prefix).unwrap_or(trimmed);
    digits
        .parse::<u64>()
        .map_err(|_| ParseIdError(s.to_string()))
}

/// Identifier of a transfer item, rendered as `dl_<millis>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(u64);

impl ItemId {
    pub fn generate() -> Self {
        Self(next_time_id())
    }
}

impl From<u64> for ItemId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dl_{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed(s, "dl_").map(Self)
    }
}

/// Identifier of a scheduled job, rendered as `job_<millis>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub fn generate() -> Self {
        Self(next_time_id())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job_{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed(s, "job_").map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_increasing() {
        let ids: Vec<ItemId> = (0..1000).map(|_| ItemId::generate()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        let set: HashSet<_> = ids.iter().collect();
        assert_eq!(set.len(), ids.len());
    }

    #[test]
    fn ids_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| JobId::generate()).collect::<Vec<_>>()))
            .collect();
        let mut all = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn display_and_parse() {
        let id = ItemId::from(1700000000123);
        assert_eq!(id.to_string(), "dl_1700000000123");
        assert_eq!("dl_1700000000123".parse::<ItemId>().unwrap(), id);
        assert_eq!("1700000000123".parse::<ItemId>().unwrap(), id);
        assert!("dl_x".parse::<ItemId>().is_err());
        assert!("job_12".parse::<JobId>().is_ok());
    }
}

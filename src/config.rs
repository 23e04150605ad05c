use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::booking::UnverifiedPolicy;
use crate::detector::DetectorOptions;
use crate::model::StatusPolicy;

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Runtime settings, read from `SLOTGUARD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    pub timeout: Duration,
    /// Venue timezone as minutes east of UTC.
    pub venue_offset_minutes: i32,
    pub status_policy: StatusPolicy,
    pub unverified_policy: UnverifiedPolicy,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            venue_offset_minutes: 0,
            status_policy: StatusPolicy::All,
            unverified_policy: UnverifiedPolicy::Allow,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let api_url = lookup("SLOTGUARD_API_URL").unwrap_or(defaults.api_url);
        let timeout = lookup("SLOTGUARD_TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout);
        let venue_offset_minutes = lookup("SLOTGUARD_VENUE_UTC_OFFSET_MIN")
            .and_then(|s| s.parse().ok())
            .filter(|m: &i32| offset_from_minutes(*m).is_some())
            .unwrap_or(defaults.venue_offset_minutes);
        let status_policy = lookup("SLOTGUARD_STATUS_POLICY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.status_policy);
        let unverified_policy = lookup("SLOTGUARD_UNVERIFIED_POLICY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.unverified_policy);
        let metrics_port = lookup("SLOTGUARD_METRICS_PORT").and_then(|s| s.parse().ok());

        Self {
            api_url,
            timeout,
            venue_offset_minutes,
            status_policy,
            unverified_policy,
            metrics_port,
        }
    }

    pub fn venue_offset(&self) -> FixedOffset {
        offset_from_minutes(self.venue_offset_minutes).unwrap_or_else(|| Utc.fix())
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            status_policy: self.status_policy,
            venue_offset: self.venue_offset(),
        }
    }
}

fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    minutes.checked_mul(60).and_then(FixedOffset::east_opt)
}

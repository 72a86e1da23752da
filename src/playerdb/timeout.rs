//! Empire membership timeout.
//!
//! A member who has not logged in recently enough stops counting toward their
//! empire's deduplicated statistics. Veterans (lifetime play above a threshold)
//! get the full timeout window; everyone else gets a window interpolated from
//! how many minutes per day they have averaged since creation.

use serde::{Deserialize, Serialize};

pub const SECS_PER_REAL_DAY: i64 = 24 * 60 * 60;
pub const SECS_PER_REAL_HOUR: i64 = 60 * 60;

/// Timeout policy, loaded from the `[membership]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberTimeout {
    /// Inactivity window for active or veteran players, in days.
    pub member_timeout_full_days: i64,
    /// Inactivity window for barely-active players, in days.
    pub member_timeout_newbie_days: i64,
    /// Average minutes per day at or above which the full window applies.
    pub minutes_per_day_full: f64,
    /// Average minutes per day at or below which the newbie window applies.
    pub minutes_per_day_newbie: f64,
    /// Lifetime hours after which only the full window is used.
    pub member_timeout_max_threshold_hours: f64,
}

impl Default for MemberTimeout {
    fn default() -> Self {
        Self {
            member_timeout_full_days: 14,
            member_timeout_newbie_days: 3,
            minutes_per_day_full: 30.0,
            minutes_per_day_newbie: 5.0,
            member_timeout_max_threshold_hours: 48.0,
        }
    }
}

impl MemberTimeout {
    /// Length of the inactivity window in seconds for the given activity,
    /// or `None` when the player is below the one-minute-per-day floor and
    /// counts as timed out no matter what.
    pub fn window_secs(&self, birth: i64, played_hours: f64, now: i64) -> Option<f64> {
        let full = (self.member_timeout_full_days * SECS_PER_REAL_DAY) as f64;
        let newbie = (self.member_timeout_newbie_days * SECS_PER_REAL_DAY) as f64;

        if played_hours >= self.member_timeout_max_threshold_hours {
            return Some(full);
        }

        // a record born "now" (or in the future) would divide by zero
        let age_secs = (now - birth).max(1) as f64;
        let days_played = age_secs / SECS_PER_REAL_DAY as f64;
        let avg_min_per_day = 60.0 * (played_hours / days_played);

        if avg_min_per_day <= 1.0 {
            return None;
        }

        let window = if avg_min_per_day >= self.minutes_per_day_full {
            full
        } else if avg_min_per_day <= self.minutes_per_day_newbie {
            newbie
        } else {
            let span = self.minutes_per_day_full - self.minutes_per_day_newbie;
            let prc = (avg_min_per_day - self.minutes_per_day_newbie) / span;
            newbie + prc * (full - newbie)
        };
        Some(window)
    }

    /// True when the member should not count toward empire statistics.
    pub fn is_timed_out(&self, birth: i64, last_login: i64, played_hours: f64, now: i64) -> bool {
        match self.window_secs(birth, played_hours, now) {
            Some(window) => (last_login as f64 + window) < now as f64,
            None => true,
        }
    }
}

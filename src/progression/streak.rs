// SPDX-License-Identifier: MIT
//! Streak state machine — a pure calendar-day transition function.
//!
//! The whole policy lives in [`advance`]; persistence and timezone
//! normalization happen elsewhere. Cases, by day difference `d` between the
//! last qualifying activity and "today":
//!
//! - no prior activity → streak starts at 1
//! - `d == 0` → no change (repeat same-day calls are idempotent)
//! - `d == 1` → streak extends, longest tracks the new maximum
//! - `d  > 1` → streak resets to 1, longest untouched
//! - `d  < 0` → no change (clock skew or a reordered event never
//!   decrements state)

use chrono::NaiveDate;

/// The streak portion of a user's aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakState {
    pub current: i64,
    pub longest: i64,
    pub last_activity: Option<NaiveDate>,
}

impl StreakState {
    pub fn new(current: i64, longest: i64, last_activity: Option<NaiveDate>) -> Self {
        Self {
            current,
            longest,
            last_activity,
        }
    }
}

/// Advance the streak state to `today`.
pub fn advance(state: StreakState, today: NaiveDate) -> StreakState {
    let last = match state.last_activity {
        None => {
            return StreakState {
                current: 1,
                longest: state.longest.max(1),
                last_activity: Some(today),
            }
        }
        Some(d) => d,
    };

    match today.signed_duration_since(last).num_days() {
        0 => state,
        1 => {
            let current = state.current + 1;
            StreakState {
                current,
                longest: state.longest.max(current),
                last_activity: Some(today),
            }
        }
        d if d > 1 => StreakState {
            current: 1,
            longest: state.longest,
            last_activity: Some(today),
        },
        // d < 0: stale or reordered event.
        _ => state,
    }
}

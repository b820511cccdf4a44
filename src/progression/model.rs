// SPDX-License-Identifier: MIT
//! Progression data model — serialisable types returned by the engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::catalog::AchievementDefinition;

/// Points granted at the call sites for a quiz answered correctly.
pub const POINTS_QUIZ_CORRECT: i64 = 20;
/// Points granted for an incorrect but attempted quiz answer.
pub const POINTS_QUIZ_ATTEMPTED: i64 = 5;

// ─── Aggregate ────────────────────────────────────────────────────────────────

/// The single per-user progression summary.
///
/// `level` is a pure projection of `total_points` (see [`level_for_points`]),
/// computed when the row is materialized — it is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionAggregate {
    pub user_id: String,
    pub total_points: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    /// Calendar day (in the configured timezone) of the last
    /// streak-qualifying activity.
    pub last_activity_date: Option<NaiveDate>,
    pub level: i64,
    pub items_read: i64,
    pub quizzes_completed: i64,
    pub checklists_completed: i64,
    pub notes_created: i64,
    pub updated_at: String,
}

/// Deterministic, monotonic points → level curve.
///
/// Level n requires `100 * (n - 1)^2` points: 0 → 1, 100 → 2, 400 → 3,
/// 900 → 4, 2500 → 6.
pub fn level_for_points(total_points: i64) -> i64 {
    let p = total_points.max(0) as f64;
    ((p / 100.0).sqrt().floor() as i64) + 1
}

// ─── Counters & reasons ───────────────────────────────────────────────────────

/// The named aggregate counters. Using an enum makes "unknown counter name"
/// unrepresentable at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    ItemsRead,
    QuizzesCompleted,
    ChecklistsCompleted,
    NotesCreated,
}

impl CounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::ItemsRead => "items_read",
            CounterKind::QuizzesCompleted => "quizzes_completed",
            CounterKind::ChecklistsCompleted => "checklists_completed",
            CounterKind::NotesCreated => "notes_created",
        }
    }
}

/// Why points were granted. Stored as TEXT in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointReason {
    QuizCorrect,
    QuizAttempted,
    ItemCompleted,
    ChecklistItem,
    NoteCreated,
    /// Bonus granted by the achievement evaluator itself.
    AchievementBonus,
    /// Applied by the reconciliation worker when replaying a dead letter.
    Reconciliation,
}

impl PointReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointReason::QuizCorrect => "quiz_correct",
            PointReason::QuizAttempted => "quiz_attempted",
            PointReason::ItemCompleted => "item_completed",
            PointReason::ChecklistItem => "checklist_item",
            PointReason::NoteCreated => "note_created",
            PointReason::AchievementBonus => "achievement_bonus",
            PointReason::Reconciliation => "reconciliation",
        }
    }
}

// ─── Event flags ──────────────────────────────────────────────────────────────

/// Transient per-event signals for the special badges. Never persisted:
/// the evaluator reads them as value 1 against the flag metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFlags {
    pub perfect_quiz: bool,
    pub early_bird: bool,
    pub night_owl: bool,
}

impl EventFlags {
    pub const NONE: EventFlags = EventFlags {
        perfect_quiz: false,
        early_bird: false,
        night_owl: false,
    };

    pub fn perfect_quiz() -> Self {
        EventFlags {
            perfect_quiz: true,
            ..Self::NONE
        }
    }

    /// Derive the time-of-day flags from a local-time hour: 0–3 counts as
    /// night-owl, 4–5 as early-bird.
    pub fn for_local_hour(hour: u32) -> Self {
        EventFlags {
            perfect_quiz: false,
            early_bird: (4..6).contains(&hour),
            night_owl: hour < 4,
        }
    }
}

// ─── Ledger & awards ──────────────────────────────────────────────────────────

/// One append-only point grant. The per-user sum of `points` always equals
/// the aggregate's `total_points`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    pub points: i64,
    pub reason: String,
    /// The entity that triggered the grant (question id, achievement id, …).
    pub reference_id: Option<String>,
    pub created_at: String,
}

/// An awarded achievement joined to its catalog definition.
#[derive(Debug, Clone, Serialize)]
pub struct EarnedBadge {
    pub definition: AchievementDefinition,
    pub earned_at: String,
    pub seen: bool,
}

/// Result of every mutating engine operation: the updated aggregate plus
/// whatever the evaluator newly awarded, so the caller can surface a "new
/// badge" notification without a second round-trip.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressionUpdate {
    pub aggregate: ProgressionAggregate,
    pub newly_awarded: Vec<EarnedBadge>,
}

/// Read projection for dashboards: aggregate, all earned badges, the unseen
/// subset, and recent ledger entries.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub aggregate: ProgressionAggregate,
    pub badges: Vec<EarnedBadge>,
    pub unseen_badges: Vec<EarnedBadge>,
    pub recent_ledger: Vec<LedgerEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn level_curve_fixed_points() {
        assert_eq!(level_for_points(0), 1);
        assert_eq!(level_for_points(99), 1);
        assert_eq!(level_for_points(100), 2);
        assert_eq!(level_for_points(399), 2);
        assert_eq!(level_for_points(400), 3);
        assert_eq!(level_for_points(900), 4);
        assert_eq!(level_for_points(2500), 6);
        // Defensive: a negative input (impossible through the engine) clamps.
        assert_eq!(level_for_points(-50), 1);
    }

    #[test]
    fn flags_for_hour() {
        assert_eq!(EventFlags::for_local_hour(0).night_owl, true);
        assert_eq!(EventFlags::for_local_hour(3).night_owl, true);
        assert_eq!(EventFlags::for_local_hour(4).night_owl, false);
        assert_eq!(EventFlags::for_local_hour(4).early_bird, true);
        assert_eq!(EventFlags::for_local_hour(5).early_bird, true);
        assert_eq!(EventFlags::for_local_hour(6), EventFlags::NONE);
        assert_eq!(EventFlags::for_local_hour(23), EventFlags::NONE);
    }

    #[test]
    fn reason_strings_round_trip_serde() {
        let json = serde_json::to_string(&PointReason::QuizCorrect).unwrap();
        assert_eq!(json, "\"quiz_correct\"");
        let back: PointReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PointReason::QuizCorrect);
        assert_eq!(PointReason::AchievementBonus.as_str(), "achievement_bonus");
    }

    proptest! {
        #[test]
        fn level_is_monotonic(a in 0i64..2_000_000, b in 0i64..2_000_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(level_for_points(lo) <= level_for_points(hi));
            prop_assert!(level_for_points(lo) >= 1);
        }
    }
}

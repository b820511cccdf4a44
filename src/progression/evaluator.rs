// SPDX-License-Identifier: MIT
//! Achievement evaluator — scans the catalog against the post-mutation
//! aggregate and awards whatever newly qualifies, exactly once.
//!
//! Runs inside the caller's transaction, so the award insert is atomic with
//! the aggregate mutation that triggered it. The storage-level composite key
//! on `achievement_awards` backstops the transaction: an `INSERT OR IGNORE`
//! that affects no rows means another event already awarded the badge, and
//! the evaluator neither reports it nor re-grants its bonus.

use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::catalog::{AchievementCatalog, Metric};
use crate::error::EngineError;
use crate::progression::model::{EarnedBadge, EventFlags, PointReason};
use crate::storage::{AggregateRow, Storage};

/// The aggregate statistic a metric reads. Flag metrics read the transient
/// per-event signals instead of persisted state.
fn metric_value(row: &AggregateRow, flags: EventFlags, metric: Metric) -> i64 {
    match metric {
        Metric::Points => row.total_points,
        Metric::Streak => row.current_streak,
        Metric::ItemsRead => row.items_read,
        Metric::QuizzesCompleted => row.quizzes_completed,
        Metric::ChecklistsCompleted => row.checklists_completed,
        Metric::NotesCreated => row.notes_created,
        Metric::PerfectQuiz => i64::from(flags.perfect_quiz),
        Metric::EarlyBird => i64::from(flags.early_bird),
        Metric::NightOwl => i64::from(flags.night_owl),
    }
}

/// Evaluate and award. Mutates `row.total_points` in memory when bonus
/// points are granted; the caller persists the row before committing.
///
/// Bonus points can push the aggregate across further point thresholds, so
/// one extra pass runs after any pass that granted them. Capped there:
/// badges earned in the second pass never trigger a third.
pub(crate) async fn run(
    conn: &mut SqliteConnection,
    catalog: &AchievementCatalog,
    row: &mut AggregateRow,
    flags: EventFlags,
    now: &str,
) -> Result<Vec<EarnedBadge>, EngineError> {
    let mut earned = Storage::earned_achievement_ids(conn, &row.user_id).await?;
    let mut newly = Vec::new();

    for pass in 0..2 {
        let mut bonus_applied = false;
        for def in catalog.definitions() {
            if earned.contains(&def.id) {
                continue;
            }
            if metric_value(row, flags, def.requirement.metric) < def.requirement.threshold {
                continue;
            }

            let inserted = Storage::insert_award(conn, &row.user_id, &def.id, now).await?;
            earned.insert(def.id.clone());
            if !inserted {
                // A concurrent event won the race; not ours to report.
                continue;
            }

            if def.reward_points > 0 {
                Storage::append_ledger(
                    conn,
                    &row.user_id,
                    def.reward_points,
                    PointReason::AchievementBonus,
                    Some(&def.id),
                    now,
                )
                .await?;
                row.total_points += def.reward_points;
                bonus_applied = true;
            }

            info!(
                user = %row.user_id,
                achievement = %def.id,
                reward = def.reward_points,
                "achievement awarded"
            );
            newly.push(EarnedBadge {
                definition: def.clone(),
                earned_at: now.to_string(),
                seen: false,
            });
        }

        if !bonus_applied {
            break;
        }
        debug!(user = %row.user_id, pass, "bonus points applied, re-scanning catalog");
    }

    Ok(newly)
}

// SPDX-License-Identifier: MIT
//! Dead-letter queue for progression updates that failed transiently.
//!
//! The primary user action (note saved, checklist item checked) must never
//! fail because its gamification side-effect did. When an engine call comes
//! back retryable, the caller records the operation here via [`push`]; a
//! background task (started by [`start_retry_worker`]) replays pending
//! entries every 5 minutes, up to 3 attempts. After that (or on the first
//! non-retryable failure) the entry is marked `permanently_failed` and left
//! for inspection via [`list`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::progression::model::{CounterKind, EventFlags, PointReason, ProgressionUpdate};
use crate::progression::ProgressionEngine;
use crate::storage::Storage;

/// Maximum number of replay attempts before marking permanently failed.
const MAX_RETRIES: i64 = 3;
/// How often the retry worker wakes up.
const RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);
/// How many pending entries one worker pass drains at most.
const BATCH_LIMIT: i64 = 100;

// ─── Types ────────────────────────────────────────────────────────────────────

/// A progression update serialized for later replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PendingOperation {
    AddPoints {
        points: i64,
        reason: PointReason,
        reference_id: Option<String>,
        #[serde(default)]
        flags: EventFlags,
    },
    TouchStreak {
        at: DateTime<Utc>,
        #[serde(default)]
        flags: EventFlags,
    },
    IncrementCounter {
        counter: CounterKind,
        by: u32,
        #[serde(default)]
        flags: EventFlags,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeadLetter {
    pub id: String,
    pub user_id: String,
    /// JSON-encoded [`PendingOperation`].
    pub operation: String,
    pub failure_reason: String,
    pub retry_count: i64,
    pub status: String,
    pub created_at: String,
    pub last_attempted_at: Option<String>,
}

/// Outcome of one [`retry_pending`] pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryStats {
    pub attempted: u64,
    pub replayed: u64,
    /// Still pending: failed retryably with attempts remaining.
    pub still_pending: u64,
    pub permanently_failed: u64,
}

// ─── Queue operations ─────────────────────────────────────────────────────────

/// Replay a recorded operation through the engine.
pub async fn apply(
    engine: &ProgressionEngine,
    user_id: &str,
    op: &PendingOperation,
) -> Result<ProgressionUpdate, EngineError> {
    match op {
        PendingOperation::AddPoints {
            points,
            reason,
            reference_id,
            flags,
        } => {
            engine
                .add_points(user_id, *points, *reason, reference_id.as_deref(), *flags)
                .await
        }
        PendingOperation::TouchStreak { at, flags } => {
            engine.touch_streak(user_id, *at, *flags).await
        }
        PendingOperation::IncrementCounter { counter, by, flags } => {
            engine.increment_counter(user_id, *counter, *by, *flags).await
        }
    }
}

/// Record a failed progression update for later replay. Never silently
/// dropping the update is the point: even if every retry fails, the entry
/// remains visible.
pub async fn push(
    storage: &Storage,
    user_id: &str,
    op: &PendingOperation,
    failure_reason: &str,
) -> Result<String, EngineError> {
    let id = Uuid::new_v4().to_string();
    let payload = serde_json::to_string(op)?;
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO progression_dead_letters
             (id, user_id, operation, failure_reason, retry_count, status, created_at)
         VALUES (?, ?, ?, ?, 0, 'pending', ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(&payload)
    .bind(failure_reason)
    .bind(&now)
    .execute(&storage.pool())
    .await?;
    warn!(user = user_id, reason = failure_reason, "progression update dead-lettered");
    Ok(id)
}

/// List dead letters, optionally filtered by status, oldest first.
pub async fn list(
    storage: &Storage,
    status_filter: Option<&str>,
    limit: i64,
) -> Result<Vec<DeadLetter>, EngineError> {
    let pool = storage.pool();
    let rows = if let Some(status) = status_filter {
        sqlx::query_as(
            "SELECT * FROM progression_dead_letters
             WHERE status = ? ORDER BY created_at ASC LIMIT ?",
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&pool)
        .await?
    } else {
        sqlx::query_as(
            "SELECT * FROM progression_dead_letters ORDER BY created_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&pool)
        .await?
    };
    Ok(rows)
}

/// Replay every pending entry once. Successful replays flip to `replayed`;
/// retryable failures stay `pending` until `MAX_RETRIES`; everything else
/// (including an undecodable payload) goes to `permanently_failed`.
pub async fn retry_pending(engine: &ProgressionEngine) -> Result<RetryStats, EngineError> {
    let storage = engine.storage().clone();
    let pending = list(&storage, Some("pending"), BATCH_LIMIT).await?;
    let mut stats = RetryStats::default();

    for entry in pending {
        stats.attempted += 1;
        let now = Utc::now().to_rfc3339();

        let op: PendingOperation = match serde_json::from_str(&entry.operation) {
            Ok(op) => op,
            Err(e) => {
                warn!(id = %entry.id, err = %e, "dead letter payload undecodable");
                set_status(&storage, &entry.id, "permanently_failed", entry.retry_count, &e.to_string(), &now).await?;
                stats.permanently_failed += 1;
                continue;
            }
        };

        match apply(engine, &entry.user_id, &op).await {
            Ok(_) => {
                set_status(&storage, &entry.id, "replayed", entry.retry_count + 1, &entry.failure_reason, &now).await?;
                stats.replayed += 1;
                info!(id = %entry.id, user = %entry.user_id, "dead letter replayed");
            }
            Err(e) => {
                let retry_count = entry.retry_count + 1;
                let exhausted = retry_count >= MAX_RETRIES || !e.is_retryable();
                let status = if exhausted { "permanently_failed" } else { "pending" };
                set_status(&storage, &entry.id, status, retry_count, &e.to_string(), &now).await?;
                if exhausted {
                    warn!(id = %entry.id, err = %e, "dead letter permanently failed");
                    stats.permanently_failed += 1;
                } else {
                    stats.still_pending += 1;
                }
            }
        }
    }
    Ok(stats)
}

async fn set_status(
    storage: &Storage,
    id: &str,
    status: &str,
    retry_count: i64,
    failure_reason: &str,
    now: &str,
) -> Result<(), EngineError> {
    sqlx::query(
        "UPDATE progression_dead_letters
         SET status = ?, retry_count = ?, failure_reason = ?, last_attempted_at = ?
         WHERE id = ?",
    )
    .bind(status)
    .bind(retry_count)
    .bind(failure_reason)
    .bind(now)
    .bind(id)
    .execute(&storage.pool())
    .await?;
    Ok(())
}

/// Spawn the background replay loop. The first pass runs immediately so a
/// restart drains whatever the previous process left behind.
pub fn start_retry_worker(engine: Arc<ProgressionEngine>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETRY_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match retry_pending(&engine).await {
                Ok(stats) if stats.attempted > 0 => {
                    info!(
                        attempted = stats.attempted,
                        replayed = stats.replayed,
                        permanently_failed = stats.permanently_failed,
                        "dead-letter retry pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(err = %e, "dead-letter retry pass failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{seed, AchievementCatalog};
    use crate::config::EngineConfig;

    async fn make_engine() -> Arc<ProgressionEngine> {
        let storage = Storage::open_in_memory().await.unwrap();
        storage.seed_catalog(seed::default_definitions()).await.unwrap();
        let catalog = AchievementCatalog::new(seed::default_definitions().to_vec());
        Arc::new(ProgressionEngine::new(
            storage,
            catalog,
            EngineConfig::default(),
        ))
    }

    #[tokio::test]
    async fn push_and_list() {
        let engine = make_engine().await;
        let op = PendingOperation::AddPoints {
            points: 20,
            reason: PointReason::QuizCorrect,
            reference_id: Some("q1".into()),
            flags: EventFlags::NONE,
        };
        let id = push(engine.storage(), "u1", &op, "storage is busy").await.unwrap();

        let all = list(engine.storage(), None, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].status, "pending");
        assert_eq!(all[0].retry_count, 0);
    }

    #[tokio::test]
    async fn retry_pending_replays_and_marks() {
        let engine = make_engine().await;
        let op = PendingOperation::AddPoints {
            points: 20,
            reason: PointReason::QuizCorrect,
            reference_id: None,
            flags: EventFlags::NONE,
        };
        push(engine.storage(), "u1", &op, "storage is busy").await.unwrap();

        let stats = retry_pending(&engine).await.unwrap();
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.replayed, 1);

        let replayed = list(engine.storage(), Some("replayed"), 10).await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(engine.storage().ledger_sum("u1").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn undecodable_payload_fails_permanently() {
        let engine = make_engine().await;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO progression_dead_letters
                 (id, user_id, operation, failure_reason, retry_count, status, created_at)
             VALUES ('dl1', 'u1', 'not json', 'boom', 0, 'pending', ?)",
        )
        .bind(&now)
        .execute(&engine.storage().pool())
        .await
        .unwrap();

        let stats = retry_pending(&engine).await.unwrap();
        assert_eq!(stats.permanently_failed, 1);
        let failed = list(engine.storage(), Some("permanently_failed"), 10).await.unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn non_retryable_replay_fails_permanently() {
        let engine = make_engine().await;
        // Validation failures never become valid; no point retrying them.
        let op = PendingOperation::AddPoints {
            points: -5,
            reason: PointReason::QuizCorrect,
            reference_id: None,
            flags: EventFlags::NONE,
        };
        push(engine.storage(), "u1", &op, "first failure").await.unwrap();

        let stats = retry_pending(&engine).await.unwrap();
        assert_eq!(stats.permanently_failed, 1);
        assert_eq!(stats.replayed, 0);
        assert_eq!(engine.storage().ledger_sum("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn operation_payload_round_trips() {
        let op = PendingOperation::IncrementCounter {
            counter: CounterKind::NotesCreated,
            by: 1,
            flags: EventFlags::NONE,
        };
        let json = serde_json::to_string(&op).unwrap();
        let back: PendingOperation = serde_json::from_str(&json).unwrap();
        match back {
            PendingOperation::IncrementCounter { counter, by, .. } => {
                assert_eq!(counter, CounterKind::NotesCreated);
                assert_eq!(by, 1);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}

// SPDX-License-Identifier: MIT
//! The progression engine — converts discrete user actions (quiz answered,
//! checklist item checked, note created, summary read) into a durable
//! per-user aggregate (points, streak, level) and one-time achievement
//! awards.
//!
//! Concurrency contract: all writes for a single user are serialized. A
//! keyed async lock covers in-process callers; the per-operation transaction
//! makes the read-modify-write plus award insert atomic; and the composite
//! primary key on `achievement_awards` backstops both across processes.
//! Every mutating operation runs under a bounded timeout — on expiry the
//! transaction rolls back and the caller gets a retryable error. Once a
//! transaction commits, the caller abandoning the future changes nothing:
//! the points and awards stand.

mod evaluator;
pub mod model;
pub mod streak;

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::catalog::{AchievementCatalog, AchievementDefinition};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::storage::{AwardJoinRow, Storage, DATE_FORMAT};
use self::model::{
    CounterKind, EarnedBadge, EventFlags, PointReason, ProgressionUpdate, UserProfile,
};
use self::streak::StreakState;

pub struct ProgressionEngine {
    storage: Storage,
    catalog: Arc<AchievementCatalog>,
    config: EngineConfig,
    /// Per-user write serialization. Entries are tiny and live for the
    /// process; the map is keyed by user id.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProgressionEngine {
    pub fn new(storage: Storage, catalog: AchievementCatalog, config: EngineConfig) -> Self {
        Self {
            storage,
            catalog: Arc::new(catalog),
            config,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn catalog(&self) -> &AchievementCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        let limit = self.config.operation_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(limit)),
        }
    }

    // ─── Mutating operations ─────────────────────────────────────────────────

    /// Grant `points` (> 0) to the user: ledger entry, aggregate bump, then
    /// an achievement scan — one transaction.
    pub async fn add_points(
        &self,
        user_id: &str,
        points: i64,
        reason: PointReason,
        reference_id: Option<&str>,
        flags: EventFlags,
    ) -> Result<ProgressionUpdate, EngineError> {
        if points <= 0 {
            return Err(EngineError::InvalidPoints(points));
        }
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        self.bounded(self.add_points_tx(user_id, points, reason, reference_id, flags))
            .await
    }

    async fn add_points_tx(
        &self,
        user_id: &str,
        points: i64,
        reason: PointReason,
        reference_id: Option<&str>,
        flags: EventFlags,
    ) -> Result<ProgressionUpdate, EngineError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.storage.pool().begin().await?;
        Storage::ensure_aggregate(&mut tx, user_id, &now).await?;
        let mut row = Storage::fetch_aggregate(&mut tx, user_id).await?;

        Storage::append_ledger(&mut tx, user_id, points, reason, reference_id, &now).await?;
        row.total_points += points;
        row.updated_at = now.clone();

        let newly_awarded = evaluator::run(&mut tx, &self.catalog, &mut row, flags, &now).await?;
        Storage::persist_aggregate(&mut tx, &row).await?;
        tx.commit().await?;

        debug!(user = user_id, points, reason = reason.as_str(), "points applied");
        Ok(ProgressionUpdate {
            aggregate: row.into_domain(),
            newly_awarded,
        })
    }

    /// Record streak-qualifying activity at instant `at`. Same-day repeats
    /// are no-ops; a stale `at` (before the recorded last activity) never
    /// decrements state.
    pub async fn touch_streak(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
        flags: EventFlags,
    ) -> Result<ProgressionUpdate, EngineError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        self.bounded(self.touch_streak_tx(user_id, at, flags)).await
    }

    async fn touch_streak_tx(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
        flags: EventFlags,
    ) -> Result<ProgressionUpdate, EngineError> {
        let now = Utc::now().to_rfc3339();
        let today = self.config.local_date(at);
        let mut tx = self.storage.pool().begin().await?;
        Storage::ensure_aggregate(&mut tx, user_id, &now).await?;
        let mut row = Storage::fetch_aggregate(&mut tx, user_id).await?;

        let prior = StreakState::new(
            row.current_streak,
            row.longest_streak,
            parse_stored_date(user_id, row.last_activity_date.as_deref()),
        );
        let next = streak::advance(prior, today);
        row.current_streak = next.current;
        row.longest_streak = next.longest;
        row.last_activity_date = next.last_activity.map(|d| d.format(DATE_FORMAT).to_string());
        row.updated_at = now.clone();

        let newly_awarded = evaluator::run(&mut tx, &self.catalog, &mut row, flags, &now).await?;
        Storage::persist_aggregate(&mut tx, &row).await?;
        tx.commit().await?;

        debug!(
            user = user_id,
            streak = next.current,
            longest = next.longest,
            "streak touched"
        );
        Ok(ProgressionUpdate {
            aggregate: row.into_domain(),
            newly_awarded,
        })
    }

    /// Increment one named counter by `by` (>= 1).
    pub async fn increment_counter(
        &self,
        user_id: &str,
        counter: CounterKind,
        by: u32,
        flags: EventFlags,
    ) -> Result<ProgressionUpdate, EngineError> {
        if by == 0 {
            return Err(EngineError::InvalidIncrement);
        }
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        self.bounded(self.increment_counter_tx(user_id, counter, by, flags))
            .await
    }

    async fn increment_counter_tx(
        &self,
        user_id: &str,
        counter: CounterKind,
        by: u32,
        flags: EventFlags,
    ) -> Result<ProgressionUpdate, EngineError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.storage.pool().begin().await?;
        Storage::ensure_aggregate(&mut tx, user_id, &now).await?;
        let mut row = Storage::fetch_aggregate(&mut tx, user_id).await?;

        *row.counter_mut(counter) += i64::from(by);
        row.updated_at = now.clone();

        let newly_awarded = evaluator::run(&mut tx, &self.catalog, &mut row, flags, &now).await?;
        Storage::persist_aggregate(&mut tx, &row).await?;
        tx.commit().await?;

        debug!(user = user_id, counter = counter.as_str(), by, "counter incremented");
        Ok(ProgressionUpdate {
            aggregate: row.into_domain(),
            newly_awarded,
        })
    }

    // ─── Notification tracking & reads ───────────────────────────────────────

    /// Flip `seen` on the given awards. Ids that don't exist or belong to
    /// another user are silently skipped; returns how many rows actually
    /// flipped.
    pub async fn mark_seen(
        &self,
        user_id: &str,
        achievement_ids: &[String],
    ) -> Result<u64, EngineError> {
        let mut flipped = 0;
        for id in achievement_ids {
            flipped += self.storage.mark_award_seen(user_id, id).await?;
        }
        Ok(flipped)
    }

    /// Read projection for dashboards: aggregate (created lazily on first
    /// read, like every other first touch), earned badges, the unseen
    /// subset, and recent ledger entries.
    pub async fn profile(&self, user_id: &str) -> Result<UserProfile, EngineError> {
        let now = Utc::now().to_rfc3339();
        let pool = self.storage.pool();
        let mut conn = pool.acquire().await?;
        Storage::ensure_aggregate(&mut conn, user_id, &now).await?;
        let row = Storage::fetch_aggregate(&mut conn, user_id).await?;
        drop(conn);

        let badges: Vec<EarnedBadge> = self
            .storage
            .list_awards(user_id)
            .await?
            .into_iter()
            .filter_map(join_to_badge)
            .collect();
        let unseen_badges = badges.iter().filter(|b| !b.seen).cloned().collect();
        let recent_ledger = self
            .storage
            .list_ledger(user_id, self.config.ledger_page_size)
            .await?;

        Ok(UserProfile {
            aggregate: row.into_domain(),
            badges,
            unseen_badges,
            recent_ledger,
        })
    }
}

fn parse_stored_date(user_id: &str, raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?;
    match NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        Ok(d) => Some(d),
        Err(_) => {
            warn!(user = user_id, value = raw, "unparseable last_activity_date");
            None
        }
    }
}

/// A stored award whose definition no longer parses is dropped from the
/// view with a warning, mirroring how the catalog loader treats it.
fn join_to_badge(join: AwardJoinRow) -> Option<EarnedBadge> {
    match crate::catalog::parse_requirement(&join.requirement) {
        Ok(requirement) => Some(EarnedBadge {
            definition: AchievementDefinition {
                id: join.id,
                name: join.name,
                description: join.description,
                icon: join.icon,
                category: join.category,
                rarity: join.rarity,
                requirement,
                reward_points: join.reward_points,
            },
            earned_at: join.earned_at,
            seen: join.seen,
        }),
        Err(reason) => {
            warn!(id = %join.id, %reason, "skipping award with malformed definition");
            None
        }
    }
}

// SPDX-License-Identifier: MIT
//! SQLite persistence for the progression engine.
//!
//! One database, four tables: `progression_aggregates` (one row per user),
//! `achievement_definitions` (read-mostly catalog), `achievement_awards`
//! (append-only, composite-keyed), `point_ledger` (append-only audit log),
//! plus the `progression_dead_letters` reconciliation queue.
//!
//! Mutating engine operations run inside a transaction; the helpers that
//! participate in one are associated functions taking a `&mut
//! SqliteConnection` so they compose with `pool.begin()` / `&mut *tx`.
//! Pool-level methods (`&self`) serve reads and the single-statement writes
//! that need no transaction.

use anyhow::{Context as _, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{ConnectOptions, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::catalog::AchievementDefinition;
use crate::config::StorageConfig;
use crate::error::EngineError;
use crate::progression::model::{
    level_for_points, CounterKind, LedgerEntry, PointReason, ProgressionAggregate,
};

/// `last_activity_date` storage format (date-only, timezone already applied).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Schema bootstrap, executed statement by statement. Every statement is
/// idempotent, so re-running on startup is safe.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS progression_aggregates (
        user_id              TEXT PRIMARY KEY,
        total_points         INTEGER NOT NULL DEFAULT 0,
        current_streak       INTEGER NOT NULL DEFAULT 0,
        longest_streak       INTEGER NOT NULL DEFAULT 0,
        last_activity_date   TEXT,
        items_read           INTEGER NOT NULL DEFAULT 0,
        quizzes_completed    INTEGER NOT NULL DEFAULT 0,
        checklists_completed INTEGER NOT NULL DEFAULT 0,
        notes_created        INTEGER NOT NULL DEFAULT 0,
        updated_at           TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS achievement_definitions (
        id            TEXT PRIMARY KEY,
        name          TEXT NOT NULL,
        description   TEXT NOT NULL,
        icon          TEXT NOT NULL DEFAULT '',
        category      TEXT NOT NULL,
        rarity        TEXT NOT NULL DEFAULT 'common',
        requirement   TEXT NOT NULL,
        reward_points INTEGER NOT NULL DEFAULT 0,
        created_at    TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS achievement_awards (
        user_id        TEXT NOT NULL,
        achievement_id TEXT NOT NULL,
        earned_at      TEXT NOT NULL,
        seen           INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (user_id, achievement_id)
    )",
    "CREATE TABLE IF NOT EXISTS point_ledger (
        id           TEXT PRIMARY KEY,
        user_id      TEXT NOT NULL,
        points       INTEGER NOT NULL,
        reason       TEXT NOT NULL,
        reference_id TEXT,
        created_at   TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_point_ledger_user ON point_ledger(user_id, created_at)",
    "CREATE TABLE IF NOT EXISTS progression_dead_letters (
        id                TEXT PRIMARY KEY,
        user_id           TEXT NOT NULL,
        operation         TEXT NOT NULL,
        failure_reason    TEXT NOT NULL,
        retry_count       INTEGER NOT NULL DEFAULT 0,
        status            TEXT NOT NULL DEFAULT 'pending',
        created_at        TEXT NOT NULL,
        last_attempted_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_dead_letters_status ON progression_dead_letters(status, created_at)",
];

// ─── Row types ────────────────────────────────────────────────────────────────

/// Raw `progression_aggregates` row. Dates stay TEXT here; the domain type
/// carries parsed values and the computed level.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AggregateRow {
    pub user_id: String,
    pub total_points: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_activity_date: Option<String>,
    pub items_read: i64,
    pub quizzes_completed: i64,
    pub checklists_completed: i64,
    pub notes_created: i64,
    pub updated_at: String,
}

impl AggregateRow {
    pub fn counter_mut(&mut self, kind: CounterKind) -> &mut i64 {
        match kind {
            CounterKind::ItemsRead => &mut self.items_read,
            CounterKind::QuizzesCompleted => &mut self.quizzes_completed,
            CounterKind::ChecklistsCompleted => &mut self.checklists_completed,
            CounterKind::NotesCreated => &mut self.notes_created,
        }
    }

    /// Materialize the public aggregate, computing `level` from points.
    /// An unparseable stored date is treated as absent (and logged) rather
    /// than failing the whole read.
    pub fn into_domain(self) -> ProgressionAggregate {
        let last_activity_date = match &self.last_activity_date {
            None => None,
            Some(raw) => match chrono::NaiveDate::parse_from_str(raw, DATE_FORMAT) {
                Ok(d) => Some(d),
                Err(_) => {
                    warn!(user = %self.user_id, value = %raw, "unparseable last_activity_date");
                    None
                }
            },
        };
        ProgressionAggregate {
            level: level_for_points(self.total_points),
            user_id: self.user_id,
            total_points: self.total_points,
            current_streak: self.current_streak,
            longest_streak: self.longest_streak,
            last_activity_date,
            items_read: self.items_read,
            quizzes_completed: self.quizzes_completed,
            checklists_completed: self.checklists_completed,
            notes_created: self.notes_created,
            updated_at: self.updated_at,
        }
    }
}

/// Raw catalog row; `requirement` is the stored JSON, parsed by the catalog
/// loader so a malformed row can be skipped instead of failing the load.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DefinitionRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub category: String,
    pub rarity: String,
    pub requirement: String,
    pub reward_points: i64,
    pub created_at: String,
}

/// An award joined to its definition, as read for profile views.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AwardJoinRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub category: String,
    pub rarity: String,
    pub requirement: String,
    pub reward_points: i64,
    pub earned_at: String,
    pub seen: bool,
}

// ─── Storage ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (creating if missing) `progression.db` under `data_dir` with the
    /// WAL journal, relaxed fsync, and a busy timeout so concurrent writers
    /// queue instead of failing immediately.
    pub async fn open(data_dir: &Path, config: &StorageConfig) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
        let db_path = data_dir.join("progression.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .create_if_missing(true)
                .pragma("busy_timeout", config.busy_timeout_ms.to_string());

        if config.slow_query_threshold_ms > 0 {
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                Duration::from_millis(config.slow_query_threshold_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    /// In-memory database for tests. A pooled `:memory:` SQLite is
    /// per-connection, so the pool is capped at a single connection to keep
    /// every query on the same database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .with_context(|| format!("running schema statement: {stmt}"))?;
        }
        Ok(())
    }

    // ─── Aggregates (transaction-scoped) ─────────────────────────────────────

    /// Create the zeroed aggregate if absent. `INSERT OR IGNORE` makes a
    /// duplicate-key race indistinguishable from success.
    pub async fn ensure_aggregate(
        conn: &mut SqliteConnection,
        user_id: &str,
        now: &str,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT OR IGNORE INTO progression_aggregates (user_id, updated_at) VALUES (?, ?)",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn fetch_aggregate(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<AggregateRow, EngineError> {
        Ok(
            sqlx::query_as("SELECT * FROM progression_aggregates WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *conn)
                .await?,
        )
    }

    /// Write back every mutable aggregate column.
    pub async fn persist_aggregate(
        conn: &mut SqliteConnection,
        row: &AggregateRow,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "UPDATE progression_aggregates SET
                 total_points = ?, current_streak = ?, longest_streak = ?,
                 last_activity_date = ?, items_read = ?, quizzes_completed = ?,
                 checklists_completed = ?, notes_created = ?, updated_at = ?
             WHERE user_id = ?",
        )
        .bind(row.total_points)
        .bind(row.current_streak)
        .bind(row.longest_streak)
        .bind(&row.last_activity_date)
        .bind(row.items_read)
        .bind(row.quizzes_completed)
        .bind(row.checklists_completed)
        .bind(row.notes_created)
        .bind(&row.updated_at)
        .bind(&row.user_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    // ─── Ledger ──────────────────────────────────────────────────────────────

    /// Append one point grant; returns the new entry id.
    pub async fn append_ledger(
        conn: &mut SqliteConnection,
        user_id: &str,
        points: i64,
        reason: PointReason,
        reference_id: Option<&str>,
        now: &str,
    ) -> Result<String, EngineError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO point_ledger (id, user_id, points, reason, reference_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(points)
        .bind(reason.as_str())
        .bind(reference_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(id)
    }

    pub async fn list_ledger(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        Ok(sqlx::query_as(
            "SELECT * FROM point_ledger WHERE user_id = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Reconciliation query: the ledger is the source of truth for
    /// `total_points`, and this sum must always match the aggregate.
    pub async fn ledger_sum(&self, user_id: &str) -> Result<i64, EngineError> {
        Ok(sqlx::query_scalar(
            "SELECT COALESCE(SUM(points), 0) FROM point_ledger WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?)
    }

    // ─── Awards ──────────────────────────────────────────────────────────────

    /// Idempotent award insert. Returns `true` only for the caller that
    /// actually created the row; a conflict means some other event already
    /// awarded it, which is success, not an error.
    pub async fn insert_award(
        conn: &mut SqliteConnection,
        user_id: &str,
        achievement_id: &str,
        now: &str,
    ) -> Result<bool, EngineError> {
        let rows_affected = sqlx::query(
            "INSERT OR IGNORE INTO achievement_awards (user_id, achievement_id, earned_at)
             VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(achievement_id)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }

    pub async fn earned_achievement_ids(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<HashSet<String>, EngineError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT achievement_id FROM achievement_awards WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&mut *conn)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// All awards for a user joined to their definitions, newest first.
    pub async fn list_awards(&self, user_id: &str) -> Result<Vec<AwardJoinRow>, EngineError> {
        Ok(sqlx::query_as(
            "SELECT d.id, d.name, d.description, d.icon, d.category, d.rarity,
                    d.requirement, d.reward_points, a.earned_at, a.seen
               FROM achievement_awards a
               INNER JOIN achievement_definitions d ON d.id = a.achievement_id
              WHERE a.user_id = ?
              ORDER BY a.earned_at DESC, d.id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Flip `seen` for one award owned by the user. Returns 1 if the row
    /// was actually flipped, 0 for unknown ids, foreign awards, or awards
    /// already seen. One-way: there is no path back to unseen.
    pub async fn mark_award_seen(
        &self,
        user_id: &str,
        achievement_id: &str,
    ) -> Result<u64, EngineError> {
        let rows_affected = sqlx::query(
            "UPDATE achievement_awards SET seen = 1
             WHERE user_id = ? AND achievement_id = ? AND seen = 0",
        )
        .bind(user_id)
        .bind(achievement_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected)
    }

    // ─── Catalog table ───────────────────────────────────────────────────────

    pub async fn list_definition_rows(&self) -> Result<Vec<DefinitionRow>, EngineError> {
        Ok(
            sqlx::query_as("SELECT * FROM achievement_definitions ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Seed the catalog table. Skips entirely when definitions already
    /// exist (administrative data wins over the built-in set); returns the
    /// number of rows inserted.
    pub async fn seed_catalog(&self, definitions: &[AchievementDefinition]) -> Result<u64> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM achievement_definitions")
            .fetch_one(&self.pool)
            .await
            .context("counting achievement definitions")?;
        if existing > 0 {
            return Ok(0);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut inserted = 0;
        for def in definitions {
            let requirement = serde_json::to_string(&def.requirement)
                .context("serializing achievement requirement")?;
            inserted += sqlx::query(
                "INSERT OR IGNORE INTO achievement_definitions
                     (id, name, description, icon, category, rarity, requirement, reward_points, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&def.id)
            .bind(&def.name)
            .bind(&def.description)
            .bind(&def.icon)
            .bind(&def.category)
            .bind(&def.rarity)
            .bind(&requirement)
            .bind(def.reward_points)
            .bind(&now)
            .execute(&self.pool)
            .await
            .with_context(|| format!("seeding achievement {}", def.id))?
            .rows_affected();
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::seed;

    async fn make_storage() -> Storage {
        Storage::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn ensure_aggregate_is_idempotent() {
        let storage = make_storage().await;
        let pool = storage.pool();
        let mut conn = pool.acquire().await.unwrap();
        let now = chrono::Utc::now().to_rfc3339();

        Storage::ensure_aggregate(&mut conn, "u1", &now).await.unwrap();
        Storage::ensure_aggregate(&mut conn, "u1", &now).await.unwrap();

        let row = Storage::fetch_aggregate(&mut conn, "u1").await.unwrap();
        assert_eq!(row.total_points, 0);
        assert_eq!(row.current_streak, 0);
        assert!(row.last_activity_date.is_none());

        drop(conn);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM progression_aggregates")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn award_insert_is_idempotent() {
        let storage = make_storage().await;
        let pool = storage.pool();
        let mut conn = pool.acquire().await.unwrap();
        let now = chrono::Utc::now().to_rfc3339();

        assert!(Storage::insert_award(&mut conn, "u1", "points_100", &now)
            .await
            .unwrap());
        assert!(!Storage::insert_award(&mut conn, "u1", "points_100", &now)
            .await
            .unwrap());

        let earned = Storage::earned_achievement_ids(&mut conn, "u1").await.unwrap();
        assert_eq!(earned.len(), 1);
        assert!(earned.contains("points_100"));
    }

    #[tokio::test]
    async fn mark_seen_flips_once_and_only_for_owner() {
        let storage = make_storage().await;
        storage.seed_catalog(seed::default_definitions()).await.unwrap();
        let pool = storage.pool();
        let mut conn = pool.acquire().await.unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        Storage::insert_award(&mut conn, "u1", "points_100", &now)
            .await
            .unwrap();
        drop(conn);

        assert_eq!(storage.mark_award_seen("u2", "points_100").await.unwrap(), 0);
        assert_eq!(storage.mark_award_seen("u1", "points_100").await.unwrap(), 1);
        // Already seen — a second call is a no-op.
        assert_eq!(storage.mark_award_seen("u1", "points_100").await.unwrap(), 0);
        assert_eq!(storage.mark_award_seen("u1", "no_such_badge").await.unwrap(), 0);

        let awards = storage.list_awards("u1").await.unwrap();
        assert_eq!(awards.len(), 1);
        assert!(awards[0].seen);
    }

    #[tokio::test]
    async fn ledger_sum_tracks_appends() {
        let storage = make_storage().await;
        let pool = storage.pool();
        let mut conn = pool.acquire().await.unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        Storage::append_ledger(&mut conn, "u1", 20, PointReason::QuizCorrect, Some("q1"), &now)
            .await
            .unwrap();
        Storage::append_ledger(&mut conn, "u1", 5, PointReason::QuizAttempted, Some("q2"), &now)
            .await
            .unwrap();
        Storage::append_ledger(&mut conn, "u2", 9, PointReason::NoteCreated, None, &now)
            .await
            .unwrap();
        drop(conn);

        assert_eq!(storage.ledger_sum("u1").await.unwrap(), 25);
        assert_eq!(storage.ledger_sum("u2").await.unwrap(), 9);
        assert_eq!(storage.ledger_sum("nobody").await.unwrap(), 0);

        let entries = storage.list_ledger("u1", 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].reason, "quiz_correct");
    }

    #[tokio::test]
    async fn seed_catalog_skips_when_populated() {
        let storage = make_storage().await;
        let defs = seed::default_definitions();
        assert_eq!(storage.seed_catalog(defs).await.unwrap(), defs.len() as u64);
        assert_eq!(storage.seed_catalog(defs).await.unwrap(), 0);
        assert_eq!(
            storage.list_definition_rows().await.unwrap().len(),
            defs.len()
        );
    }

    #[test]
    fn aggregate_row_domain_conversion() {
        let row = AggregateRow {
            user_id: "u1".into(),
            total_points: 450,
            current_streak: 2,
            longest_streak: 5,
            last_activity_date: Some("2026-02-10".into()),
            items_read: 3,
            quizzes_completed: 1,
            checklists_completed: 0,
            notes_created: 7,
            updated_at: "2026-02-10T12:00:00Z".into(),
        };
        let agg = row.into_domain();
        assert_eq!(agg.level, 3);
        assert_eq!(
            agg.last_activity_date,
            chrono::NaiveDate::from_ymd_opt(2026, 2, 10)
        );

        let bad = AggregateRow {
            last_activity_date: Some("yesterday".into()),
            user_id: "u2".into(),
            total_points: 0,
            current_streak: 0,
            longest_streak: 0,
            items_read: 0,
            quizzes_completed: 0,
            checklists_completed: 0,
            notes_created: 0,
            updated_at: String::new(),
        };
        assert!(bad.into_domain().last_activity_date.is_none());
    }
}

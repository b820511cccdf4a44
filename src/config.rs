// SPDX-License-Identifier: MIT
//! Engine configuration (`progression.toml` + env overrides).
//!
//! Every field has a default, so an absent file or empty table yields a
//! working configuration. Env vars override the file:
//! `PROGRESSION_TIMEZONE_OFFSET_MINUTES`, `PROGRESSION_OPERATION_TIMEOUT_MS`.

use anyhow::{Context as _, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_LEDGER_PAGE_SIZE: i64 = 20;

// ─── StorageConfig ────────────────────────────────────────────────────────────

/// SQLite tuning (`[storage]` in progression.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds). Default: 100.
    /// Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
    /// `PRAGMA busy_timeout` — how long a writer waits on a locked database
    /// before SQLITE_BUSY surfaces (milliseconds). Default: 5000.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
            busy_timeout_ms: 5_000,
        }
    }
}

// ─── EngineConfig ─────────────────────────────────────────────────────────────

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Offset from UTC, in minutes, used to normalize activity timestamps to
    /// the calendar day that streaks count in. Default: 0 (UTC).
    pub timezone_offset_minutes: i32,
    /// Upper bound for a single mutating operation, transaction included
    /// (milliseconds). On expiry the transaction rolls back and the caller
    /// gets a retryable error.
    pub operation_timeout_ms: u64,
    /// How many recent ledger entries a profile read returns.
    pub ledger_page_size: i64,
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone_offset_minutes: 0,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            ledger_page_size: DEFAULT_LEDGER_PAGE_SIZE,
            storage: StorageConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, falling back to defaults when the file is
    /// absent, then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", p.display()))?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PROGRESSION_TIMEZONE_OFFSET_MINUTES") {
            match v.parse() {
                Ok(n) => self.timezone_offset_minutes = n,
                Err(_) => warn!(value = %v, "ignoring unparseable PROGRESSION_TIMEZONE_OFFSET_MINUTES"),
            }
        }
        if let Ok(v) = std::env::var("PROGRESSION_OPERATION_TIMEOUT_MS") {
            match v.parse() {
                Ok(n) => self.operation_timeout_ms = n,
                Err(_) => warn!(value = %v, "ignoring unparseable PROGRESSION_OPERATION_TIMEOUT_MS"),
            }
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// The configured timezone. An out-of-range offset falls back to UTC.
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("UTC offset is valid"))
    }

    /// Normalize an instant to the calendar day streaks count in.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone()).date_naive()
    }
}

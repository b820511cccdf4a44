// SPDX-License-Identifier: MIT
//! Achievement catalog — data-driven threshold rules evaluated by the
//! progression engine.
//!
//! The catalog is an injected, read-only dependency: the engine holds an
//! immutable snapshot loaded once through a [`CatalogSource`], so tests can
//! hand it fixture definitions and production loads the seeded
//! `achievement_definitions` table. A malformed definition is skipped with a
//! logged warning and never aborts evaluation of the rest.

pub mod seed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EngineError;
use crate::storage::Storage;

// ─── Requirement ──────────────────────────────────────────────────────────────

/// The aggregate statistic (or transient per-event flag) a requirement
/// compares against its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Points,
    Streak,
    #[serde(alias = "itemsRead")]
    ItemsRead,
    #[serde(alias = "quizzes", alias = "quizzesCompleted")]
    QuizzesCompleted,
    #[serde(alias = "checklistsCompleted")]
    ChecklistsCompleted,
    #[serde(alias = "notesCreated")]
    NotesCreated,
    PerfectQuiz,
    EarlyBird,
    NightOwl,
}

impl Metric {
    /// Flag metrics are satisfied by a transient per-event signal rather
    /// than persisted aggregate state.
    pub fn is_flag(&self) -> bool {
        matches!(
            self,
            Metric::PerfectQuiz | Metric::EarlyBird | Metric::NightOwl
        )
    }
}

/// A threshold rule: award once `metric >= threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(rename = "type")]
    pub metric: Metric,
    #[serde(rename = "value")]
    pub threshold: i64,
}

/// Parse a requirement from its stored JSON form,
/// e.g. `{"type": "streak", "value": 7}`.
///
/// Accepts the legacy camelCase metric spellings as aliases. A threshold
/// below 1 is rejected — such a rule would award on the zeroed aggregate.
pub fn parse_requirement(raw: &str) -> Result<Requirement, String> {
    let req: Requirement = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    if req.threshold < 1 {
        return Err(format!("threshold {} must be at least 1", req.threshold));
    }
    Ok(req)
}

// ─── Definitions ──────────────────────────────────────────────────────────────

/// One catalog entry. `category` and `rarity` are display metadata carried
/// through untouched; only `requirement` and `reward_points` drive the
/// evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    /// One of `milestone`, `streak`, `achievement`, `special` in the stock set.
    pub category: String,
    /// One of `common`, `rare`, `epic`, `legendary` in the stock set.
    pub rarity: String,
    pub requirement: Requirement,
    /// Bonus points granted when the achievement is awarded.
    pub reward_points: i64,
}

/// Immutable catalog snapshot.
#[derive(Debug, Clone, Default)]
pub struct AchievementCatalog {
    definitions: Vec<AchievementDefinition>,
}

impl AchievementCatalog {
    pub fn new(definitions: Vec<AchievementDefinition>) -> Self {
        Self { definitions }
    }

    /// Load a snapshot through a source, skipping whatever the source
    /// could not validate.
    pub async fn load(source: &dyn CatalogSource) -> Result<Self, EngineError> {
        Ok(Self::new(source.load().await?))
    }

    pub fn definitions(&self) -> &[AchievementDefinition] {
        &self.definitions
    }

    pub fn get(&self, id: &str) -> Option<&AchievementDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

// ─── Sources ──────────────────────────────────────────────────────────────────

/// Where catalog definitions come from. Production uses [`DbCatalogSource`];
/// tests inject fixtures via [`StaticCatalogSource`].
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn load(&self) -> Result<Vec<AchievementDefinition>, EngineError>;
}

/// Reads the seeded `achievement_definitions` table. Rows whose stored
/// requirement JSON fails to parse are skipped with a warning.
pub struct DbCatalogSource {
    storage: Storage,
}

impl DbCatalogSource {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl CatalogSource for DbCatalogSource {
    async fn load(&self) -> Result<Vec<AchievementDefinition>, EngineError> {
        let rows = self.storage.list_definition_rows().await?;
        let mut definitions = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_requirement(&row.requirement) {
                Ok(requirement) => definitions.push(AchievementDefinition {
                    id: row.id,
                    name: row.name,
                    description: row.description,
                    icon: row.icon,
                    category: row.category,
                    rarity: row.rarity,
                    requirement,
                    reward_points: row.reward_points,
                }),
                Err(reason) => {
                    warn!(id = %row.id, %reason, "skipping malformed achievement definition");
                }
            }
        }
        Ok(definitions)
    }
}

/// A fixed in-memory definition list.
pub struct StaticCatalogSource {
    definitions: Vec<AchievementDefinition>,
}

impl StaticCatalogSource {
    pub fn new(definitions: Vec<AchievementDefinition>) -> Self {
        Self { definitions }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    async fn load(&self) -> Result<Vec<AchievementDefinition>, EngineError> {
        Ok(self.definitions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snake_case_and_legacy_aliases() {
        let req = parse_requirement(r#"{"type": "points", "value": 1000}"#).unwrap();
        assert_eq!(req.metric, Metric::Points);
        assert_eq!(req.threshold, 1000);

        let req = parse_requirement(r#"{"type": "itemsRead", "value": 5}"#).unwrap();
        assert_eq!(req.metric, Metric::ItemsRead);

        let req = parse_requirement(r#"{"type": "quizzes", "value": 25}"#).unwrap();
        assert_eq!(req.metric, Metric::QuizzesCompleted);

        let req = parse_requirement(r#"{"type": "perfect_quiz", "value": 1}"#).unwrap();
        assert!(req.metric.is_flag());
    }

    #[test]
    fn rejects_unknown_metric_and_bad_threshold() {
        assert!(parse_requirement(r#"{"type": "karma", "value": 10}"#).is_err());
        assert!(parse_requirement(r#"{"type": "points", "value": 0}"#).is_err());
        assert!(parse_requirement("not json at all").is_err());
    }

    #[test]
    fn catalog_lookup() {
        let catalog = AchievementCatalog::new(seed::default_definitions().to_vec());
        assert!(!catalog.is_empty());
        let first = catalog.get("points_100").expect("stock definition");
        assert_eq!(first.requirement.metric, Metric::Points);
        assert_eq!(first.requirement.threshold, 100);
        assert!(catalog.get("no_such_badge").is_none());
    }

    #[tokio::test]
    async fn static_source_round_trips() {
        let source = StaticCatalogSource::new(seed::default_definitions().to_vec());
        let catalog = AchievementCatalog::load(&source).await.unwrap();
        assert_eq!(catalog.len(), seed::default_definitions().len());
    }
}

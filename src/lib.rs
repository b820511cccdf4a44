// SPDX-License-Identifier: MIT
//! Progression ledger & achievement engine.
//!
//! Converts discrete user actions (quiz answered, checklist item checked,
//! note created, summary read) into a durable per-user aggregate — points,
//! streak, level — and into one-time achievement awards drawn from a
//! data-driven catalog of threshold rules.
//!
//! The engine is a library: the API layer above it supplies an
//! authenticated `user_id` and an event, and renders whatever
//! [`ProgressionUpdate`] comes back. All writes for one user are serialized;
//! awards are idempotent all the way down to the storage constraint; and a
//! gamification failure is always surfaced as a typed, classifiable error
//! so the caller can retry it or park it in the [`reconcile`] queue — never
//! silently dropped.

pub mod catalog;
pub mod config;
pub mod error;
pub mod progression;
pub mod reconcile;
pub mod retry;
pub mod storage;

pub use catalog::{
    AchievementCatalog, AchievementDefinition, CatalogSource, DbCatalogSource, Metric,
    Requirement, StaticCatalogSource,
};
pub use config::EngineConfig;
pub use error::EngineError;
pub use progression::model::{
    CounterKind, EarnedBadge, EventFlags, LedgerEntry, PointReason, ProgressionAggregate,
    ProgressionUpdate, UserProfile,
};
pub use progression::ProgressionEngine;
pub use storage::Storage;

/// Open storage under `data_dir`, seed the stock catalog when the table is
/// empty, load the catalog snapshot, and build an engine.
pub async fn bootstrap(
    data_dir: &std::path::Path,
    config: EngineConfig,
) -> anyhow::Result<ProgressionEngine> {
    let storage = Storage::open(data_dir, &config.storage).await?;
    storage
        .seed_catalog(catalog::seed::default_definitions())
        .await?;
    let source = DbCatalogSource::new(storage.clone());
    let catalog = AchievementCatalog::load(&source).await?;
    Ok(ProgressionEngine::new(storage, catalog, config))
}

//! Error types for aurum.
//!
//! A single enum covers every failure surface the engine exposes: bad configuration, bad
//! metadata (duplicate/contradictory entity descriptions), persistence failures from the
//! Unit of Work, query-construction failures, hydration failures, and migration failures.
//! `sqlx::Error` converts in via `#[from]` so `?` works across the stack.

use thiserror::Error;

/// The error type for all aurum operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing configuration (connection string, migrations directory, etc).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Entity metadata is missing, duplicated, or internally contradictory.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// A Unit of Work operation (persist/remove/find/flush) failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A query could not be built or executed as specified.
    #[error("query error: {0}")]
    Query(String),

    /// Hydration of a row (or rows) into an entity failed.
    #[error("hydration error: {0}")]
    Hydration(String),

    /// A migration failed to apply or roll back.
    #[error("migration error: {0}")]
    Migration(String),

    /// A migration unit chose to skip itself (not an error in the usual sense; carried as a
    /// distinct status by the Migration Engine, see [`crate::migration::MigrationStatus`]).
    #[error("migration skipped: {0}")]
    SkipMigration(String),

    /// Two or more registered migration units depend on each other, directly or transitively.
    #[error("circular dependency: {0}")]
    CircularDependency(String),

    /// A migration unit declares a dependency on a version that isn't registered.
    #[error("dependency not met: {0}")]
    DependencyNotMet(String),

    /// A `find`/`first`-style lookup found no matching row.
    #[error("not found: {0}")]
    NotFound(String),

    /// A database operation failed. Converted automatically from `sqlx::Error`.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn metadata(msg: impl Into<String>) -> Self {
        Error::Metadata(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Error::Persistence(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Error::Query(msg.into())
    }

    pub fn hydration(msg: impl Into<String>) -> Self {
        Error::Hydration(msg.into())
    }

    pub fn migration(msg: impl Into<String>) -> Self {
        Error::Migration(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}

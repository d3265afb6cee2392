//! Engine configuration.
//!
//! Grounded on the teacher's `DatabaseBuilder` connection-pool options (`database.rs`),
//! serialized so it can be loaded from a file the way spec.md §6 assumes migration/tracking
//! settings are configured, with `serde` per the teacher's existing `Cargo.toml` dependency.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::DatabaseBuilder;
use crate::migration::MigrationRepository;

/// Top-level configuration for an [`crate::entity_manager::EntityManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// A `sqlite:`/`mysql:`/`mariadb:` connection URL.
    pub connection_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Name of the table the Migration Engine uses to track applied versions.
    #[serde(default = "default_migrations_table")]
    pub migrations_table: String,
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    0
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_migrations_table() -> String {
    MigrationRepository::default_name().to_string()
}

impl Config {
    pub fn new(connection_url: impl Into<String>) -> Self {
        Config {
            connection_url: connection_url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            migrations_table: default_migrations_table(),
        }
    }

    pub(crate) fn builder(&self) -> DatabaseBuilder {
        crate::connection::Database::builder()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
    }
}

//! # Aurum
//!
//! **Aurum** is an async ORM engine for SQLite and MySQL/MariaDB, built on top of
//! [sqlx](https://github.com/launchbadge/sqlx)'s driver-agnostic `Any` backend. It provides a
//! Unit of Work with an identity map, a fluent Query Builder with automatic join resolution,
//! single-table and joined-table inheritance, and a versioned Migration Engine.
//!
//! ## Features
//!
//! - **Async & Non-blocking**: Built on `tokio` and `sqlx`
//! - **Dual-Driver Support**: SQLite and MySQL/MariaDB, via `sqlx::Any`
//! - **Macro-based Entities**: Define your schema with `#[derive(Entity)]`
//! - **Unit of Work**: Identity map, change tracking, cascades, nested/savepoint-scoped units
//! - **Fluent Query Builder**: Filtering, ordering, grouping, pagination, automatic joins
//! - **Inheritance**: Single-table and joined-table strategies with discriminator columns
//! - **Versioned Migrations**: Dependency-ordered, rollback-capable, dry-run friendly
//!
//! ## Quick Start Example
//!
//! ```rust,ignore
//! use aurum::{Config, Entity, EntityManager};
//!
//! #[derive(Entity, Debug, Clone)]
//! #[aurum(table = "users")]
//! struct User {
//!     #[aurum(primary_key)]
//!     id: i64,
//!     #[aurum(size = 50, unique)]
//!     username: String,
//!     age: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("sqlite::memory:");
//!     let manager = EntityManager::connect(&config).await?;
//!
//!     let mut uow = manager.unit_of_work().await?;
//!     uow.persist(User { id: 1, username: "john_doe".into(), age: 25 })?;
//!     uow.flush().await?;
//!     uow.commit().await?;
//!
//!     Ok(())
//! }
//! ```

// ============================================================================
// Macro Re-exports
// ============================================================================

/// Re-export of the procedural macro that implements `Entity` for a struct.
pub use aurum_macro::Entity;

// ============================================================================
// Module Declarations
// ============================================================================

/// Database connection pooling, driver detection, and transactions/savepoints.
pub mod connection;

/// Dynamic value representation and type conversion shared across the engine.
pub mod value;

/// Entity/field/association/inheritance metadata and the process-wide registry.
pub mod metadata;

/// Identity keys, entity lifecycle state, and change-set diffing.
pub mod identity;

/// The Unit of Work: identity map, cascades, and transactional flush.
pub mod uow;

/// Fluent query builder with automatic join resolution.
pub mod query;

/// Row-to-entity hydration.
pub mod hydrate;

/// Versioned schema migrations.
pub mod migration;

/// The `EntityManager` façade.
pub mod entity_manager;

/// Engine configuration.
pub mod config;

/// Error types and handling.
pub mod errors;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use config::Config;
pub use connection::{Connection, Database, Drivers, Transaction};
pub use entity_manager::EntityManager;
pub use errors::Error;
pub use hydrate::{Hydrator, RowStream};
pub use identity::{AssociationChange, EntityState, IdentityKey};
pub use metadata::{
    AssociationDescriptor, AssociationKind, CascadeSet, Entity, EntityBuilder, EntityDescriptor, FetchMode, FieldDescriptor,
    InheritanceDescriptor, InheritanceStrategy, JoinTableDescriptor, MetadataRegistry, MultiColumnFieldDescriptor,
};
pub use migration::{
    diff_schema, generate_migration_version, MigrationEngine, MigrationRepository, MigrationStatus, MigrationUnit, SchemaDiffReport, SchemaOp,
};
pub use query::{JoinKind, QueryBuilder, Subquery};
pub use uow::{NestedUnitOfWork, UnitOfWork};
pub use value::{LogicalType, Value, ZonedTimestamp};

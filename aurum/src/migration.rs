//! Versioned schema migrations.
//!
//! The teacher's `Migrator` only ever creates tables for registered structs, in two unordered
//! phases (tables, then foreign keys). This module builds a real migration history on top of
//! that idea: named, ordered, dependency-aware units recorded in a tracking table, with
//! rollback and dry-run support. The auto-DDL path (`generate`) is seeded from the teacher's
//! `create_table`/`assign_foreign_keys` column-to-SQL mapping, now driven by
//! `EntityDescriptor`/`LogicalType` instead of per-struct codegen.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use sqlx::Row;

use crate::connection::{Connection, Database, Drivers, Transaction};
use crate::errors::Error;
use crate::metadata::EntityDescriptor;
use crate::uow::topo_sort;

/// The outcome of attempting to apply or roll back one migration unit.
///
/// A plain `Result<(), Error>` can't distinguish "ran and skipped itself" from "ran and
/// failed" without resorting to exceptions for control flow; spec.md asks for `SkipMigration`
/// to be a first-class status instead (the redesign note this resolves).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    Applied,
    Skipped(String),
    Failed(String),
}

/// One named, ordered schema change.
///
/// `up`/`down` receive the transaction directly rather than a `Database`, so a unit can issue
/// several statements atomically when `transactional()` is true. MySQL/MariaDB's DDL statements
/// implicitly commit the enclosing transaction (unlike SQLite's), so `transactional(false)`
/// should be set for units that rely on being able to roll back a partially-applied `up`.
pub trait MigrationUnit: Send + Sync {
    /// `YYYYMMDDHHMMSS`, used both for display and for default ordering when there is no
    /// explicit dependency between two units.
    fn version(&self) -> &str;
    fn description(&self) -> &str;

    /// Versions that must be applied before this one. Declaring a dependency participates in
    /// the Migration Engine's ordering the same way `uow::topo_sort` orders insert order for
    /// foreign-key cycles.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn transactional(&self) -> bool {
        true
    }

    fn up<'c>(&'c self, tx: &'c mut Transaction<'_>) -> BoxFuture<'c, Result<(), Error>>;
    fn down<'c>(&'c self, tx: &'c mut Transaction<'_>) -> BoxFuture<'c, Result<(), Error>>;
}

/// Tracks which migrations have already been applied, in a configurable tracking table
/// (`aurum_migrations` by default, per spec.md §6).
pub struct MigrationRepository {
    table_name: String,
}

impl MigrationRepository {
    pub fn new(table_name: impl Into<String>) -> Self {
        MigrationRepository { table_name: table_name.into() }
    }

    pub fn default_name() -> &'static str {
        "aurum_migrations"
    }

    /// Schema per spec.md §6: an auto-incrementing `id`, a unique 14-digit `version`, a
    /// `description`, the UTC instant the migration was `executed_at`, and how long its `up()`
    /// took to run, in seconds (`execution_time`).
    pub async fn ensure_table(&self, db: &Database) -> Result<(), Error> {
        let quoted = db.driver().quote(&self.table_name);
        let sql = match db.driver() {
            Drivers::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                    id INTEGER PRIMARY KEY AUTOINCREMENT, \
                    version TEXT NOT NULL UNIQUE, \
                    description TEXT NOT NULL, \
                    executed_at TEXT NOT NULL, \
                    execution_time REAL NOT NULL DEFAULT 0\
                )",
                quoted
            ),
            Drivers::MySql => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                    id INT AUTO_INCREMENT PRIMARY KEY, \
                    version VARCHAR(14) NOT NULL UNIQUE, \
                    description TEXT NOT NULL, \
                    executed_at VARCHAR(40) NOT NULL, \
                    execution_time DOUBLE NOT NULL DEFAULT 0\
                )",
                quoted
            ),
        };
        sqlx::query(&sql).execute(db.pool()).await?;
        Ok(())
    }

    pub async fn applied_versions(&self, db: &Database) -> Result<Vec<String>, Error> {
        let quoted = db.driver().quote(&self.table_name);
        let sql = format!("SELECT version FROM {} ORDER BY version ASC", quoted);
        let rows = sqlx::query(&sql).fetch_all(db.pool()).await?;
        rows.iter().map(|r| r.try_get::<String, _>("version").map_err(Error::from)).collect()
    }

    pub async fn record_applied(
        &self,
        db: &Database,
        version: &str,
        description: &str,
        execution_time: f64,
    ) -> Result<(), Error> {
        let quoted = db.driver().quote(&self.table_name);
        let sql = format!(
            "INSERT INTO {} (version, description, executed_at, execution_time) VALUES (?, ?, ?, ?)",
            quoted
        );
        sqlx::query(&sql)
            .bind(version)
            .bind(description)
            .bind(Utc::now().to_rfc3339())
            .bind(execution_time)
            .execute(db.pool())
            .await?;
        Ok(())
    }

    pub async fn remove(&self, db: &Database, version: &str) -> Result<(), Error> {
        let quoted = db.driver().quote(&self.table_name);
        let sql = format!("DELETE FROM {} WHERE version = ?", quoted);
        sqlx::query(&sql).bind(version).execute(db.pool()).await?;
        Ok(())
    }
}

/// Renders the `CREATE TABLE` statement for one entity's own columns (excludes columns
/// belonging to a joined-inheritance parent table). Used both by `MigrationEngine::generate`
/// and by dry-run previews.
pub fn create_table_ddl(descriptor: &EntityDescriptor, driver: Drivers) -> String {
    let mut column_defs = Vec::new();
    for field in &descriptor.fields {
        let mut def = format!("{} {}", driver.quote(&field.column), field.logical_type.sql_type(driver));
        if field.is_primary_key {
            def.push_str(" PRIMARY KEY");
        }
        if !field.nullable && !field.is_primary_key {
            def.push_str(" NOT NULL");
        }
        if field.is_unique && !field.is_primary_key {
            def.push_str(" UNIQUE");
        }
        column_defs.push(def);
    }
    for mc in &descriptor.multi_column_fields {
        for (suffix, logical_type) in &mc.columns {
            column_defs.push(format!("{} {}", driver.quote(&format!("{}_{}", mc.name, suffix)), logical_type.sql_type(driver)));
        }
    }
    if let Some(inh) = &descriptor.inheritance {
        if inh.parent_table.is_none() {
            column_defs.push(format!("{} TEXT NOT NULL", driver.quote(&inh.discriminator_column)));
        }
    }

    format!("CREATE TABLE IF NOT EXISTS {} ({})", driver.quote(&descriptor.table_name), column_defs.join(", "))
}

/// Renders the foreign-key-bearing `ALTER TABLE` statements for an entity's `ManyToOne`/owning
/// `OneToOne` associations, to be run only after every referenced table exists.
pub fn foreign_key_ddl(descriptor: &EntityDescriptor, driver: Drivers) -> Vec<String> {
    descriptor
        .associations
        .iter()
        .filter_map(|assoc| match &assoc.kind {
            crate::metadata::AssociationKind::ManyToOne { foreign_key_column } => Some((foreign_key_column, &assoc.target_table)),
            crate::metadata::AssociationKind::OneToOne { foreign_key_column: Some(fk), .. } => Some((fk, &assoc.target_table)),
            _ => None,
        })
        .map(|(fk_column, target_table)| {
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} (id)",
                driver.quote(&descriptor.table_name),
                driver.quote(&format!("fk_{}_{}", descriptor.table_name, fk_column)),
                driver.quote(fk_column),
                driver.quote(target_table)
            )
        })
        .collect()
}

/// Allocates a fresh `YYYYMMDDHHMMSS` version for a new migration, the way `diesel migration
/// generate`/rails' generators stamp a timestamp onto a description. Validates the description
/// (non-empty, at most 200 characters, and restricted to alphanumerics, spaces, underscores and
/// hyphens so it's safe to fold into a file or tracking-table name) and rejects a collision
/// against `existing_versions`. Deliberately stops at handing back the version string: unlike
/// the CLI generators it's modeled on, this does not touch the filesystem — scaffolding a
/// migration file is a separate concern from the engine itself.
pub fn generate_migration_version(description: &str, existing_versions: &[String], now: chrono::DateTime<Utc>) -> Result<String, Error> {
    if description.is_empty() {
        return Err(Error::migration("migration description must not be empty"));
    }
    if description.len() > 200 {
        return Err(Error::migration("migration description must be at most 200 characters"));
    }
    if !description.chars().all(|c| c.is_alphanumeric() || c == ' ' || c == '_' || c == '-') {
        return Err(Error::migration("migration description may only contain letters, digits, spaces, '_' and '-'"));
    }

    let version = now.format("%Y%m%d%H%M%S").to_string();
    if existing_versions.iter().any(|v| v == &version) {
        return Err(Error::migration(format!("a migration with version '{}' already exists", version)));
    }
    Ok(version)
}

/// One declarative schema change discovered by [`diff_schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaOp {
    CreateTable(String),
    AddColumn { table: String, column: String },
    DropColumn { table: String, column: String },
}

/// The result of comparing a live database's tables against a set of entity descriptors: the
/// declarative operations needed to bring the schema in line, plus the SQL that implements and
/// reverses them. Mirrors `generate`'s DDL rendering but for incremental changes against an
/// already-existing schema rather than a from-scratch `CREATE TABLE`.
pub struct SchemaDiffReport {
    ops: Vec<SchemaOp>,
    up_ddl: Vec<String>,
    down_ddl: Vec<String>,
}

impl SchemaDiffReport {
    pub fn as_declarative(&self) -> &[SchemaOp] {
        &self.ops
    }

    pub fn as_sql(&self) -> (String, String) {
        (self.up_ddl.join(";\n") + if self.up_ddl.is_empty() { "" } else { ";" },
         self.down_ddl.join(";\n") + if self.down_ddl.is_empty() { "" } else { ";" })
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Runs every `up` statement against `db`, in order. Does not record anything in the
    /// migration tracking table — callers that want history should wrap this in a
    /// `MigrationUnit` instead.
    pub async fn persist(&self, db: &Database) -> Result<(), Error> {
        for stmt in &self.up_ddl {
            sqlx::query(stmt).execute(db.pool()).await?;
        }
        Ok(())
    }
}

/// Compares `existing_tables` (table name -> its known column names) against `descriptors` and
/// reports what's missing: whole tables, and columns within tables that already exist. Dropped
/// columns (present in `existing_tables` but not in the descriptor) are reported too, but never
/// included in `up_ddl` — column drops are destructive enough that `SchemaDiffReport::persist`
/// should not run them unattended; they're surfaced for a human to act on via `as_declarative`.
pub fn diff_schema(existing_tables: &HashMap<String, Vec<String>>, descriptors: &[Arc<EntityDescriptor>], driver: Drivers) -> SchemaDiffReport {
    let mut ops = Vec::new();
    let mut up_ddl = Vec::new();
    let mut down_ddl = Vec::new();

    for descriptor in descriptors {
        match existing_tables.get(&descriptor.table_name) {
            None => {
                ops.push(SchemaOp::CreateTable(descriptor.table_name.clone()));
                up_ddl.push(create_table_ddl(descriptor, driver));
                down_ddl.push(format!("DROP TABLE {}", driver.quote(&descriptor.table_name)));
            }
            Some(existing_columns) => {
                for field in &descriptor.fields {
                    if !existing_columns.contains(&field.column) {
                        ops.push(SchemaOp::AddColumn { table: descriptor.table_name.clone(), column: field.column.clone() });
                        up_ddl.push(format!(
                            "ALTER TABLE {} ADD COLUMN {} {}",
                            driver.quote(&descriptor.table_name),
                            driver.quote(&field.column),
                            field.logical_type.sql_type(driver)
                        ));
                        down_ddl.push(format!("ALTER TABLE {} DROP COLUMN {}", driver.quote(&descriptor.table_name), driver.quote(&field.column)));
                    }
                }
                let known_columns: Vec<&str> = descriptor.fields.iter().map(|f| f.column.as_str()).collect();
                for existing_column in existing_columns {
                    if !known_columns.contains(&existing_column.as_str()) {
                        ops.push(SchemaOp::DropColumn { table: descriptor.table_name.clone(), column: existing_column.clone() });
                    }
                }
            }
        }
    }

    SchemaDiffReport { ops, up_ddl, down_ddl }
}

/// Orchestrates applying/rolling back registered `MigrationUnit`s against the tracking table.
pub struct MigrationEngine<'a> {
    db: &'a Database,
    units: Vec<Box<dyn MigrationUnit>>,
    repository: MigrationRepository,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(db: &'a Database) -> Self {
        MigrationEngine { db, units: Vec::new(), repository: MigrationRepository::new(MigrationRepository::default_name()) }
    }

    pub fn with_tracking_table(mut self, table_name: impl Into<String>) -> Self {
        self.repository = MigrationRepository::new(table_name);
        self
    }

    pub fn register(mut self, unit: Box<dyn MigrationUnit>) -> Self {
        self.units.push(unit);
        self
    }

    /// Renders the `CREATE TABLE`/foreign-key DDL for a set of entity descriptors, in
    /// dependency order, without executing it. Used for dry runs and for seeding a fresh
    /// database without hand-written migration units.
    pub fn generate(descriptors: &[Arc<EntityDescriptor>], driver: Drivers) -> String {
        let ordered = Self::order_descriptors(descriptors);
        let mut statements: Vec<String> = ordered.iter().map(|d| create_table_ddl(d, driver)).collect();
        for d in &ordered {
            statements.extend(foreign_key_ddl(d, driver));
        }
        statements.join(";\n") + ";"
    }

    fn order_descriptors(descriptors: &[Arc<EntityDescriptor>]) -> Vec<Arc<EntityDescriptor>> {
        let names: Vec<String> = descriptors.iter().map(|d| d.table_name.clone()).collect();
        let by_name: HashMap<String, Arc<EntityDescriptor>> = descriptors.iter().map(|d| (d.table_name.clone(), d.clone())).collect();
        let (ordered, cyclic) = topo_sort(&names, |name| {
            by_name
                .get(name)
                .map(|d| {
                    d.associations
                        .iter()
                        .filter_map(|a| match &a.kind {
                            crate::metadata::AssociationKind::ManyToOne { .. } => Some(a.target_table.clone()),
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default()
        });
        ordered.into_iter().chain(cyclic).filter_map(|name| by_name.get(&name).cloned()).collect()
    }

    /// Orders registered units by dependency (Kahn's algorithm via `topo_sort`). Fails outright
    /// rather than silently degrading to registration order: a dependency naming a version
    /// nobody registered is `DependencyNotMet`, and a true cycle among registered units is
    /// `CircularDependency`.
    fn ordered_units(&self) -> Result<Vec<&Box<dyn MigrationUnit>>, Error> {
        let versions: Vec<String> = self.units.iter().map(|u| u.version().to_string()).collect();
        let by_version: HashMap<String, &Box<dyn MigrationUnit>> = self.units.iter().map(|u| (u.version().to_string(), u)).collect();

        for unit in &self.units {
            for dep in unit.dependencies() {
                if !by_version.contains_key(&dep) {
                    return Err(Error::DependencyNotMet(format!(
                        "migration '{}' depends on '{}', which is not registered",
                        unit.version(),
                        dep
                    )));
                }
            }
        }

        let (ordered, cyclic) = topo_sort(&versions, |v| by_version.get(v).map(|u| u.dependencies()).unwrap_or_default());
        if !cyclic.is_empty() {
            let mut cyclic_sorted = cyclic.clone();
            cyclic_sorted.sort();
            return Err(Error::CircularDependency(format!(
                "circular dependency among migrations: {}",
                cyclic_sorted.join(", ")
            )));
        }
        Ok(ordered.into_iter().filter_map(|v| by_version.get(&v).copied()).collect())
    }

    pub async fn status(&self) -> Result<Vec<(String, bool)>, Error> {
        self.repository.ensure_table(self.db).await?;
        let applied = self.repository.applied_versions(self.db).await?;
        Ok(self
            .ordered_units()?
            .into_iter()
            .map(|u| (u.version().to_string(), applied.contains(&u.version().to_string())))
            .collect())
    }

    /// Applies every unregistered-but-applied migration unit in dependency order. With
    /// `dry_run`, nothing is executed or recorded — the caller gets back the plan it would
    /// have run.
    pub async fn migrate_to_latest(&self, dry_run: bool) -> Result<Vec<(String, MigrationStatus)>, Error> {
        self.repository.ensure_table(self.db).await?;
        let applied = self.repository.applied_versions(self.db).await?;
        let mut results = Vec::new();

        for unit in self.ordered_units()? {
            if applied.contains(&unit.version().to_string()) {
                continue;
            }
            if dry_run {
                results.push((unit.version().to_string(), MigrationStatus::Skipped("dry run".to_string())));
                continue;
            }
            results.push((unit.version().to_string(), self.apply_one(unit.as_ref()).await?));
        }
        Ok(results)
    }

    pub async fn migrate_to_version(&self, target_version: &str, dry_run: bool) -> Result<Vec<(String, MigrationStatus)>, Error> {
        self.repository.ensure_table(self.db).await?;
        let applied = self.repository.applied_versions(self.db).await?;
        let mut results = Vec::new();

        for unit in self.ordered_units()? {
            if unit.version() > target_version {
                break;
            }
            if applied.contains(&unit.version().to_string()) {
                continue;
            }
            if dry_run {
                results.push((unit.version().to_string(), MigrationStatus::Skipped("dry run".to_string())));
                continue;
            }
            results.push((unit.version().to_string(), self.apply_one(unit.as_ref()).await?));
        }
        Ok(results)
    }

    pub async fn rollback_last(&self, dry_run: bool) -> Result<Option<(String, MigrationStatus)>, Error> {
        let applied = self.repository.applied_versions(self.db).await?;
        let Some(last_version) = applied.last().cloned() else { return Ok(None) };
        let Some(unit) = self.units.iter().find(|u| u.version() == last_version) else {
            return Err(Error::migration(format!("no registered unit for applied version '{}'", last_version)));
        };

        if dry_run {
            return Ok(Some((last_version, MigrationStatus::Skipped("dry run".to_string()))));
        }

        let mut tx = self.db.begin().await?;
        let outcome = unit.down(&mut tx).await;
        match outcome {
            Ok(()) => {
                tx.commit().await?;
                self.repository.remove(self.db, &last_version).await?;
                Ok(Some((last_version, MigrationStatus::Applied)))
            }
            Err(Error::SkipMigration(reason)) => {
                tx.rollback().await?;
                Ok(Some((last_version, MigrationStatus::Skipped(reason))))
            }
            Err(e) => {
                tx.rollback().await?;
                Ok(Some((last_version, MigrationStatus::Failed(e.to_string()))))
            }
        }
    }

    async fn apply_one(&self, unit: &dyn MigrationUnit) -> Result<MigrationStatus, Error> {
        let mut tx = self.db.begin().await?;
        let started = std::time::Instant::now();
        match unit.up(&mut tx).await {
            Ok(()) => {
                let elapsed = started.elapsed().as_secs_f64();
                tx.commit().await?;
                self.repository.record_applied(self.db, unit.version(), unit.description(), elapsed).await?;
                Ok(MigrationStatus::Applied)
            }
            Err(Error::SkipMigration(reason)) => {
                tx.rollback().await?;
                Ok(MigrationStatus::Skipped(reason))
            }
            Err(e) => {
                tx.rollback().await?;
                Ok(MigrationStatus::Failed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityBuilder, FieldDescriptor};
    use crate::value::LogicalType;

    struct Dummy;

    #[test]
    fn create_table_ddl_includes_primary_key() {
        let descriptor = EntityBuilder::new("dummy")
            .field(FieldDescriptor {
                name: "id".into(),
                column: "id".into(),
                logical_type: LogicalType::BigInt,
                nullable: false,
                is_primary_key: true,
                is_unique: true,
            })
            .build::<Dummy>()
            .unwrap();

        let ddl = create_table_ddl(&descriptor, Drivers::Sqlite);
        assert!(ddl.contains("PRIMARY KEY"));
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS"));
    }

    #[test]
    fn generate_migration_version_stamps_timestamp_and_rejects_collisions() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-07-28T10:15:00Z").unwrap().with_timezone(&Utc);
        let version = generate_migration_version("add users table", &[], now).expect("valid description");
        assert_eq!(version, "20260728101500");

        let err = generate_migration_version("add users table", &[version], now).unwrap_err();
        assert!(matches!(err, Error::Migration(_)));
    }

    #[test]
    fn generate_migration_version_rejects_bad_descriptions() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-07-28T10:15:00Z").unwrap().with_timezone(&Utc);
        assert!(generate_migration_version("", &[], now).is_err());
        assert!(generate_migration_version("has a; semicolon", &[], now).is_err());
    }

    #[test]
    fn diff_schema_reports_missing_table_and_missing_column() {
        let id_field = FieldDescriptor {
            name: "id".into(),
            column: "id".into(),
            logical_type: LogicalType::BigInt,
            nullable: false,
            is_primary_key: true,
            is_unique: true,
        };
        let name_field = FieldDescriptor {
            name: "name".into(),
            column: "name".into(),
            logical_type: LogicalType::Text,
            nullable: false,
            is_primary_key: false,
            is_unique: false,
        };
        let descriptor = Arc::new(
            EntityBuilder::new("dummy")
                .field(id_field)
                .field(name_field)
                .build::<Dummy>()
                .unwrap(),
        );

        let empty = HashMap::new();
        let report = diff_schema(&empty, &[descriptor.clone()], Drivers::Sqlite);
        assert_eq!(report.as_declarative(), &[SchemaOp::CreateTable("dummy".into())]);

        let mut existing = HashMap::new();
        existing.insert("dummy".to_string(), vec!["id".to_string()]);
        let report = diff_schema(&existing, &[descriptor], Drivers::Sqlite);
        assert_eq!(report.as_declarative(), &[SchemaOp::AddColumn { table: "dummy".into(), column: "name".into() }]);
    }
}

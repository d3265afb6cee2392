//! `EntityManager`: the façade tying connection, query builder, Unit of Work, and migration
//! engine together, the way the teacher's `Database` ties `.model::<T>()`/`.migrator()`/
//! `.begin()` together in one place.

use crate::config::Config;
use crate::connection::Database;
use crate::errors::Error;
use crate::identity::IdentityKey;
use crate::metadata::Entity;
use crate::migration::MigrationEngine;
use crate::query::QueryBuilder;
use crate::uow::UnitOfWork;

/// The top-level entry point applications hold onto: one per connection pool.
pub struct EntityManager {
    db: Database,
    migrations_table: String,
    session: Option<UnitOfWork<'static>>,
}

impl EntityManager {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let db = config.builder().connect(&config.connection_url).await?;
        Ok(EntityManager { db, migrations_table: config.migrations_table.clone(), session: None })
    }

    pub fn from_database(db: Database) -> Self {
        EntityManager { db, migrations_table: crate::migration::MigrationRepository::default_name().to_string(), session: None }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Starts a fluent, read-only query against `T` directly on the pool (no identity map).
    pub fn query<T: Entity + Default + Send + Sync + 'static>(&mut self) -> QueryBuilder<'_, T, Database> {
        QueryBuilder::new(&mut self.db)
    }

    /// Opens a new Unit of Work on a fresh transaction.
    pub async fn unit_of_work(&self) -> Result<UnitOfWork<'static>, Error> {
        let tx = self.db.begin().await?;
        Ok(UnitOfWork::new(tx))
    }

    /// Starts building a Migration Engine run against this connection, tracking applied
    /// versions in the table named by `Config::migrations_table`.
    pub fn migrations(&self) -> MigrationEngine<'_> {
        MigrationEngine::new(&self.db).with_tracking_table(self.migrations_table.clone())
    }

    /// Lazily opens the implicit session `persist`/`remove`/`find`/`flush`/`clear` operate on,
    /// so a caller that never touches the Unit of Work directly doesn't pay for a transaction
    /// it never uses.
    async fn session(&mut self) -> Result<&mut UnitOfWork<'static>, Error> {
        if self.session.is_none() {
            self.session = Some(self.unit_of_work().await?);
        }
        Ok(self.session.as_mut().expect("session was just populated"))
    }

    /// Schedules `entity` for insertion on the implicit session, opening one if none is active
    /// yet. A thin convenience over `unit_of_work().persist(...)` for callers that don't need
    /// explicit transaction control.
    pub async fn persist<T: Entity + 'static>(&mut self, entity: T) -> Result<IdentityKey, Error> {
        self.session().await?.persist(entity)
    }

    pub async fn remove(&mut self, key: &IdentityKey) -> Result<(), Error> {
        self.session().await?.remove(key)
    }

    pub async fn find<T: Entity + Default + Clone + 'static>(&mut self, key: &IdentityKey) -> Result<Option<T>, Error> {
        self.session().await?.find(key).await
    }

    /// Flushes the implicit session's pending changes to the database, without committing its
    /// transaction — mirrors `UnitOfWork::flush`.
    pub async fn flush(&mut self) -> Result<(), Error> {
        self.session().await?.flush().await
    }

    /// Commits the implicit session's transaction, if one was ever opened, and clears it so the
    /// next `persist`/`remove`/`find` call starts a fresh one.
    pub async fn commit(&mut self) -> Result<(), Error> {
        if let Some(session) = self.session.take() {
            session.commit().await?;
        }
        Ok(())
    }

    /// Clears the implicit session's identity map and pending-change tracking without touching
    /// its transaction — mirrors `UnitOfWork::clear`.
    pub async fn clear(&mut self) -> Result<(), Error> {
        self.session().await?.clear();
        Ok(())
    }
}

//! Database connection and transaction abstraction.
//!
//! `Database` wraps a `sqlx::AnyPool` and the detected [`Drivers`] variant, mirroring the
//! teacher's `database.rs`/`transaction.rs` split but with PostgreSQL removed (see
//! `DESIGN.md`): aurum targets the SQLite family and the MySQL/MariaDB family only. The
//! `Connection` trait abstracts over a pooled `Database` and a `Transaction` via a GAT so
//! the Query Builder and Unit of Work can run against either without duplicating code.

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::time::Duration;

use crate::errors::Error;

/// Supported database drivers.
///
/// Detected from the connection URL scheme. Only the SQLite and MySQL/MariaDB families are
/// supported; see `DESIGN.md` for why PostgreSQL was dropped from the teacher's three-way
/// `Drivers` enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drivers {
    Sqlite,
    MySql,
}

impl Drivers {
    /// The identifier-quoting character for this driver (teacher quotes with `"`
    /// unconditionally; MySQL requires backticks).
    pub fn quote_char(&self) -> char {
        match self {
            Drivers::Sqlite => '"',
            Drivers::MySql => '`',
        }
    }

    pub fn quote(&self, ident: &str) -> String {
        let q = self.quote_char();
        format!("{q}{ident}{q}")
    }
}

/// A trait representing a database connection or transaction.
///
/// Abstracts over `Database` (pool) and `Transaction` (in-flight transaction) so the Query
/// Builder and Unit of Work can be generic over either. Uses a GAT to bind the executor's
/// lifetime to the borrow of `self`, exactly as the teacher's `Connection` trait does.
pub trait Connection {
    type Exec<'c>: sqlx::Executor<'c, Database = sqlx::Any>
    where
        Self: 'c;

    fn executor<'c>(&'c mut self) -> Self::Exec<'c>;
    fn driver(&self) -> Drivers;
}

/// A builder for a pooled `Database` connection.
#[derive(Debug)]
pub struct DatabaseBuilder {
    options: AnyPoolOptions,
}

impl DatabaseBuilder {
    pub fn max_connections(mut self, max: u32) -> Self {
        self.options = self.options.max_connections(max);
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.options = self.options.min_connections(min);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.acquire_timeout(timeout);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.idle_timeout(Some(timeout));
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.options = self.options.max_lifetime(Some(lifetime));
        self
    }

    pub async fn connect(self, url: &str) -> Result<Database, Error> {
        sqlx::any::install_default_drivers();

        let pool = self.options.connect(url).await?;

        let (scheme, _) = url.split_once(':').unwrap_or(("sqlite", ""));
        let driver = match scheme {
            "mysql" | "mariadb" => Drivers::MySql,
            _ => Drivers::Sqlite,
        };

        Ok(Database { pool, driver })
    }
}

/// The main entry point for a pooled database connection.
#[derive(Debug, Clone)]
pub struct Database {
    pub(crate) pool: AnyPool,
    pub(crate) driver: Drivers,
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder { options: AnyPoolOptions::new() }
    }

    pub async fn connect(url: &str) -> Result<Self, Error> {
        Self::builder().max_connections(5).connect(url).await
    }

    pub fn driver(&self) -> Drivers {
        self.driver
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Starts a new top-level transaction.
    pub async fn begin(&self) -> Result<Transaction<'static>, Error> {
        let tx = self.pool.begin().await?;
        Ok(Transaction { tx, driver: self.driver, depth: 0 })
    }
}

impl Connection for Database {
    type Exec<'c> = &'c sqlx::Pool<sqlx::Any>;

    fn executor<'c>(&'c mut self) -> Self::Exec<'c> {
        &self.pool
    }

    fn driver(&self) -> Drivers {
        self.driver
    }
}

impl<'a> Connection for &'a mut Database {
    type Exec<'c>
        = &'c sqlx::Pool<sqlx::Any>
    where
        Self: 'c;

    fn executor<'c>(&'c mut self) -> Self::Exec<'c> {
        &(**self).pool
    }

    fn driver(&self) -> Drivers {
        (**self).driver
    }
}

/// A wrapper around a `sqlx::Any` transaction.
///
/// `depth` tracks savepoint nesting for the Unit of Work's nested-UoW support (spec.md §4.2 /
/// §5): a nested Unit of Work opens a savepoint named `sp_{depth}` rather than a fresh
/// transaction, so `rollback` only undoes that nested scope.
#[derive(Debug)]
pub struct Transaction<'a> {
    pub(crate) tx: sqlx::Transaction<'a, sqlx::Any>,
    pub(crate) driver: Drivers,
    pub(crate) depth: u32,
}

impl<'a> Connection for Transaction<'a> {
    type Exec<'c>
        = &'c mut sqlx::AnyConnection
    where
        Self: 'c;

    fn executor<'c>(&'c mut self) -> Self::Exec<'c> {
        &mut *self.tx
    }

    fn driver(&self) -> Drivers {
        self.driver
    }
}

impl<'a> Transaction<'a> {
    /// Opens a savepoint scoped to a nested Unit of Work. The savepoint is named
    /// deterministically by nesting depth, per spec.md.
    pub async fn savepoint(&mut self) -> Result<String, Error> {
        let name = format!("sp_{}", self.depth + 1);
        sqlx::query(&format!("SAVEPOINT {}", name)).execute(&mut *self.tx).await?;
        self.depth += 1;
        Ok(name)
    }

    pub async fn release_savepoint(&mut self, name: &str) -> Result<(), Error> {
        sqlx::query(&format!("RELEASE SAVEPOINT {}", name)).execute(&mut *self.tx).await?;
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    pub async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), Error> {
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", name)).execute(&mut *self.tx).await?;
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    pub async fn commit(self) -> Result<(), Error> {
        self.tx.commit().await.map_err(Error::from)
    }

    pub async fn rollback(self) -> Result<(), Error> {
        self.tx.rollback().await.map_err(Error::from)
    }
}

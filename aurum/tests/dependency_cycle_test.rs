use aurum::uow::topo_sort;
use aurum::{Config, Connection, EntityManager, MigrationUnit, Transaction};
use futures::future::BoxFuture;

#[test]
fn topo_sort_surfaces_a_true_cycle_as_a_cyclic_remainder() {
    let nodes = vec!["a".to_string(), "b".to_string()];
    let (ordered, cyclic) = topo_sort(&nodes, |n| match n.as_str() {
        "a" => vec!["b".to_string()],
        "b" => vec!["a".to_string()],
        _ => Vec::new(),
    });
    assert!(ordered.is_empty());
    let mut cyclic_sorted = cyclic.clone();
    cyclic_sorted.sort();
    assert_eq!(cyclic_sorted, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn topo_sort_still_orders_the_acyclic_part_around_a_disjoint_cycle() {
    let nodes = vec!["root".to_string(), "a".to_string(), "b".to_string()];
    let (ordered, cyclic) = topo_sort(&nodes, |n| match n.as_str() {
        "a" => vec!["b".to_string()],
        "b" => vec!["a".to_string()],
        _ => Vec::new(),
    });
    assert_eq!(ordered, vec!["root".to_string()]);
    let mut cyclic_sorted = cyclic.clone();
    cyclic_sorted.sort();
    assert_eq!(cyclic_sorted, vec!["a".to_string(), "b".to_string()]);
}

// Two migration units that declare each other as a dependency. An entity-level equivalent of
// this (two structs each holding the other as a direct `ManyToOne` field) cannot even compile
// in Rust, since each struct's size would depend on the other's — so this exercises the same
// cyclic case through the Migration Engine instead, where it must be reported as
// `Error::CircularDependency` rather than silently applied in registration order.
struct UnitA;

impl MigrationUnit for UnitA {
    fn version(&self) -> &str {
        "20260201000000"
    }

    fn description(&self) -> &str {
        "unit a, depends on unit b"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["20260202000000".to_string()]
    }

    fn up<'c>(&'c self, tx: &'c mut Transaction<'_>) -> BoxFuture<'c, Result<(), aurum::Error>> {
        Box::pin(async move {
            sqlx::query("CREATE TABLE a_marker (id INTEGER PRIMARY KEY)").execute(tx.executor()).await?;
            Ok(())
        })
    }

    fn down<'c>(&'c self, tx: &'c mut Transaction<'_>) -> BoxFuture<'c, Result<(), aurum::Error>> {
        Box::pin(async move {
            sqlx::query("DROP TABLE a_marker").execute(tx.executor()).await?;
            Ok(())
        })
    }
}

struct UnitB;

impl MigrationUnit for UnitB {
    fn version(&self) -> &str {
        "20260202000000"
    }

    fn description(&self) -> &str {
        "unit b, depends on unit a"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["20260201000000".to_string()]
    }

    fn up<'c>(&'c self, tx: &'c mut Transaction<'_>) -> BoxFuture<'c, Result<(), aurum::Error>> {
        Box::pin(async move {
            sqlx::query("CREATE TABLE b_marker (id INTEGER PRIMARY KEY)").execute(tx.executor()).await?;
            Ok(())
        })
    }

    fn down<'c>(&'c self, tx: &'c mut Transaction<'_>) -> BoxFuture<'c, Result<(), aurum::Error>> {
        Box::pin(async move {
            sqlx::query("DROP TABLE b_marker").execute(tx.executor()).await?;
            Ok(())
        })
    }
}

#[tokio::test]
async fn migration_engine_rejects_a_circular_dependency() {
    let mut config = Config::new("sqlite::memory:");
    config.max_connections = 1;
    let manager = EntityManager::connect(&config).await.expect("connect");

    let engine = manager.migrations().register(Box::new(UnitA)).register(Box::new(UnitB));

    let err = engine.migrate_to_latest(false).await.expect_err("a→b→a must be rejected, not silently applied");
    assert!(matches!(err, aurum::Error::CircularDependency(_)), "expected CircularDependency, got {:?}", err);

    let status = engine.status().await.expect_err("status must also refuse to order a cyclic registration");
    assert!(matches!(status, aurum::Error::CircularDependency(_)));
}

struct UnitWithMissingDependency;

impl MigrationUnit for UnitWithMissingDependency {
    fn version(&self) -> &str {
        "20260301000000"
    }

    fn description(&self) -> &str {
        "depends on a version nobody registered"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["20259912999999".to_string()]
    }

    fn up<'c>(&'c self, tx: &'c mut Transaction<'_>) -> BoxFuture<'c, Result<(), aurum::Error>> {
        Box::pin(async move {
            sqlx::query("CREATE TABLE missing_dep_marker (id INTEGER PRIMARY KEY)").execute(tx.executor()).await?;
            Ok(())
        })
    }

    fn down<'c>(&'c self, tx: &'c mut Transaction<'_>) -> BoxFuture<'c, Result<(), aurum::Error>> {
        Box::pin(async move {
            sqlx::query("DROP TABLE missing_dep_marker").execute(tx.executor()).await?;
            Ok(())
        })
    }
}

#[tokio::test]
async fn migration_engine_rejects_a_dependency_on_an_unregistered_version() {
    let mut config = Config::new("sqlite::memory:");
    config.max_connections = 1;
    let manager = EntityManager::connect(&config).await.expect("connect");

    let engine = manager.migrations().register(Box::new(UnitWithMissingDependency));

    let err = engine.migrate_to_latest(false).await.expect_err("dependency on an unregistered version must be rejected");
    assert!(matches!(err, aurum::Error::DependencyNotMet(_)), "expected DependencyNotMet, got {:?}", err);
}

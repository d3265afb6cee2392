use aurum::{Config, Entity, EntityManager, Value};

#[derive(Entity, Debug, Clone)]
#[aurum(table = "users")]
struct User {
    #[aurum(primary_key)]
    id: i64,
    #[aurum(size = 50, unique)]
    username: String,
    age: i64,
}

async fn connect() -> EntityManager {
    let mut config = Config::new("sqlite::memory:");
    config.max_connections = 1;
    let manager = EntityManager::connect(&config).await.expect("connect to in-memory sqlite");

    let ddl = aurum::migration::create_table_ddl(&User::descriptor(), manager.database().driver());
    sqlx::query(&ddl).execute(manager.database().pool()).await.expect("create users table");

    manager
}

#[tokio::test]
async fn persist_then_find_round_trips_through_identity_map() {
    let mut manager = connect().await;

    let mut uow = manager.unit_of_work().await.expect("begin unit of work");
    let key = uow.persist(User { id: 1, username: "john_doe".into(), age: 25 }).expect("persist user");
    assert!(uow.contains(&key));
    uow.flush().await.expect("flush");
    uow.commit().await.expect("commit");

    let found: User = manager
        .query::<User>()
        .equals("username", Value::Text("john_doe".into()))
        .first()
        .await
        .expect("find by username");
    assert_eq!(found.id, 1);
    assert_eq!(found.age, 25);

    let again: User = manager.query::<User>().equals("id", Value::I64(1)).first().await.expect("find by id");
    assert_eq!(again.username, "john_doe");

    let mut uow = manager.unit_of_work().await.expect("begin unit of work");
    let managed = uow.manage(found);
    let removal_key = uow.key_of(&managed).expect("key for managed user");
    uow.remove(&removal_key).expect("remove managed user");
    uow.flush().await.expect("flush removal");
    uow.commit().await.expect("commit removal");

    let remaining = manager.query::<User>().scan().await.expect("scan users");
    assert!(remaining.is_empty());
}

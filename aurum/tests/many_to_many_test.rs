use aurum::{AssociationChange, Config, Entity, EntityManager, Value};

#[derive(Entity, Debug, Clone)]
#[aurum(table = "posts")]
struct Post {
    #[aurum(primary_key)]
    id: i64,
    title: String,
    #[aurum(many_to_many, join_table = "posts_tags", owner_column = "post_id", target_column = "tag_id")]
    tags: Vec<Tag>,
}

#[derive(Entity, Debug, Clone)]
#[aurum(table = "tags")]
struct Tag {
    #[aurum(primary_key)]
    id: i64,
    name: String,
}

#[tokio::test]
async fn many_to_many_association_round_trips_through_the_junction_table() {
    let mut config = Config::new("sqlite::memory:");
    config.max_connections = 1;
    let mut manager = EntityManager::connect(&config).await.expect("connect");

    let driver = manager.database().driver();
    let statements = [
        aurum::migration::create_table_ddl(&Post::descriptor(), driver),
        aurum::migration::create_table_ddl(&Tag::descriptor(), driver),
        "CREATE TABLE posts_tags (post_id INTEGER NOT NULL, tag_id INTEGER NOT NULL, PRIMARY KEY (post_id, tag_id))".to_string(),
    ];
    for ddl in &statements {
        sqlx::query(ddl).execute(manager.database().pool()).await.expect("provision schema");
    }

    let mut uow = manager.unit_of_work().await.expect("begin uow");
    let post_key = uow.persist(Post { id: 1, title: "Hello, Aurum".into(), tags: Vec::new() }).expect("persist post");
    let tag_key = uow.persist(Tag { id: 1, name: "rust".into() }).expect("persist tag");
    uow.flush().await.expect("flush inserts");

    uow.record_association_change("tags", AssociationChange::Add { owner_key: post_key.clone(), target_key: tag_key.clone() });
    uow.flush().await.expect("flush junction row");
    uow.commit().await.expect("commit");

    let tagged_posts: Vec<Post> = manager
        .query::<Post>()
        .join("tags")
        .expect("join tags")
        .equals("tags.id", Value::I64(1))
        .scan()
        .await
        .expect("scan tagged posts");
    assert_eq!(tagged_posts.len(), 1);
    assert_eq!(tagged_posts[0].title, "Hello, Aurum");

    let untagged: Vec<Post> = manager
        .query::<Post>()
        .join("tags")
        .expect("join tags")
        .equals("tags.id", Value::I64(2))
        .scan()
        .await
        .expect("scan for a tag that was never linked");
    assert!(untagged.is_empty());
}

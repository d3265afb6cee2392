use aurum::{Config, Entity, EntityManager, Value, ZonedTimestamp};
use chrono::{DateTime, NaiveDate, Utc};

#[derive(Entity, Debug, Clone)]
#[aurum(table = "events")]
struct Event {
    #[aurum(primary_key)]
    id: i64,
    label: String,
    #[aurum(multi_column = "occurred_at:instant")]
    occurred_at_instant: Option<chrono::NaiveDateTime>,
    #[aurum(multi_column = "occurred_at:offset")]
    occurred_at_offset_minutes: Option<i64>,
}

#[tokio::test]
async fn multi_column_field_round_trips_through_persist_and_query() {
    let mut config = Config::new("sqlite::memory:");
    config.max_connections = 1;
    let mut manager = EntityManager::connect(&config).await.expect("connect");

    let ddl = aurum::migration::create_table_ddl(&Event::descriptor(), manager.database().driver());
    sqlx::query(&ddl).execute(manager.database().pool()).await.expect("create events table");

    let occurred_at = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap().and_hms_opt(14, 30, 0).unwrap();

    let mut uow = manager.unit_of_work().await.expect("begin uow");
    uow.persist(Event {
        id: 1,
        label: "deploy".into(),
        occurred_at_instant: Some(occurred_at),
        occurred_at_offset_minutes: Some(-420),
    })
    .expect("persist event");
    uow.persist(Event { id: 2, label: "rollback".into(), occurred_at_instant: None, occurred_at_offset_minutes: None })
        .expect("persist event with unset multi-column field");
    uow.flush().await.expect("flush");
    uow.commit().await.expect("commit");

    let found = manager.query::<Event>().equals("id", Value::I64(1)).first().await.expect("find event");
    assert_eq!(found.occurred_at_instant, Some(occurred_at));
    assert_eq!(found.occurred_at_offset_minutes, Some(-420));

    let unset = manager.query::<Event>().equals("id", Value::I64(2)).first().await.expect("find unset event");
    assert_eq!(unset.occurred_at_instant, None);
    assert_eq!(unset.occurred_at_offset_minutes, None);
}

#[derive(Entity, Debug, Clone)]
#[aurum(table = "appointments")]
struct Appointment {
    #[aurum(primary_key)]
    id: i64,
    title: String,
    #[aurum(zoned_timestamp = "scheduled_at")]
    scheduled_at: Option<ZonedTimestamp>,
}

#[tokio::test]
async fn zoned_timestamp_round_trips_through_three_sub_columns() {
    let mut config = Config::new("sqlite::memory:");
    config.max_connections = 1;
    let mut manager = EntityManager::connect(&config).await.expect("connect");

    let ddl = aurum::migration::create_table_ddl(&Appointment::descriptor(), manager.database().driver());
    sqlx::query(&ddl).execute(manager.database().pool()).await.expect("create appointments table");

    // 2026-07-28 14:00 UTC is 2026-07-28 10:00 in America/New_York (UTC-4 under summer DST).
    let utc: DateTime<Utc> = "2026-07-28T14:00:00Z".parse().unwrap();
    let local = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap().and_hms_opt(10, 0, 0).unwrap();
    let scheduled = ZonedTimestamp::new(utc, local, "America/New_York");

    let mut uow = manager.unit_of_work().await.expect("begin uow");
    uow.persist(Appointment { id: 1, title: "checkup".into(), scheduled_at: Some(scheduled.clone()) }).expect("persist appointment");
    uow.persist(Appointment { id: 2, title: "unscheduled".into(), scheduled_at: None }).expect("persist appointment with no schedule");
    uow.flush().await.expect("flush");
    uow.commit().await.expect("commit");

    let found = manager.query::<Appointment>().equals("id", Value::I64(1)).first().await.expect("find appointment");
    assert_eq!(found.scheduled_at, Some(scheduled));

    let unset = manager.query::<Appointment>().equals("id", Value::I64(2)).first().await.expect("find unscheduled appointment");
    assert_eq!(unset.scheduled_at, None);
}

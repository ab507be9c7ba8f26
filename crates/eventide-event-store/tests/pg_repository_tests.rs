//! Integration tests for the PostgreSQL repositories.
//!
//! Each test gets a fresh database from `#[sqlx::test]`, so they need
//! `DATABASE_URL` pointing at a server the test user may create databases on.
//! Run with `cargo test -p eventide-event-store -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use eventide_core::aggregate_root::AggregateRoot;
use eventide_core::config::{EventClassMap, EventStoreConfig, RepositoryVariant};
use eventide_core::error::DomainError;
use eventide_core::event::PendingEvent;
use eventide_core::repository::{StoredEvent, StoredEventRepository};
use eventide_core::snapshot::{Snapshot, SnapshotRepository};
use eventide_event_store::{
    PgConcurrentEventRepository, PgSnapshotRepository, PgStoredEventRepository, schema,
};
use eventide_test_support::{Account, AccountCommands, FixedClock, init_tracing};
use futures_util::TryStreamExt;
use sqlx::PgPool;
use uuid::Uuid;

fn pending(class: &str, n: i64) -> PendingEvent {
    PendingEvent {
        event_class: class.to_owned(),
        event_properties: serde_json::json!({ "n": n }),
        meta_data: serde_json::json!({}),
    }
}

fn versions(events: &[StoredEvent]) -> Vec<Option<i64>> {
    events.iter().map(|e| e.aggregate_version).collect()
}

async fn provisioned(pool: &PgPool, config: &EventStoreConfig) {
    init_tracing();
    schema::provision(pool, config).await.unwrap();
}

async fn concurrent(pool: PgPool) -> PgConcurrentEventRepository {
    let config = EventStoreConfig::default();
    provisioned(&pool, &config).await;
    PgConcurrentEventRepository::new(pool, &config)
        .unwrap()
        .with_clock(Arc::new(FixedClock::reference()))
}

async fn strict(pool: PgPool) -> PgStoredEventRepository {
    let config = EventStoreConfig {
        repository: RepositoryVariant::Strict,
        ..EventStoreConfig::default()
    };
    provisioned(&pool, &config).await;
    PgStoredEventRepository::new(pool, &config).unwrap()
}

// --- persist_many + reads ---

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_persist_many_assigns_versions_and_reads_in_id_order(pool: PgPool) {
    // Arrange
    let repo = concurrent(pool).await;
    let (left, right) = (Uuid::new_v4(), Uuid::new_v4());

    // Act
    let first = repo
        .persist_many(vec![pending("a", 1), pending("b", 2)], Some(left), Some(0))
        .await
        .unwrap();
    repo.persist_many(vec![pending("c", 3)], Some(right), Some(0))
        .await
        .unwrap();
    repo.persist_many(vec![pending("d", 4)], Some(left), Some(2))
        .await
        .unwrap();

    // Assert
    assert_eq!(versions(&first), vec![Some(1), Some(2)]);
    assert_eq!(first[0].created_at, FixedClock::reference().0);

    let all: Vec<_> = repo.retrieve_all(None).try_collect().await.unwrap();
    let ids: Vec<_> = all.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), 4);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let left_events: Vec<_> = repo.retrieve_all(Some(left)).try_collect().await.unwrap();
    assert_eq!(versions(&left_events), vec![Some(1), Some(2), Some(3)]);

    let after: Vec<_> = repo
        .retrieve_all_after_version(1, left)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(versions(&after), vec![Some(2), Some(3)]);

    let from_third: Vec<_> = repo
        .retrieve_all_starting_from(ids[2], None)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(from_third.len(), 2);
    assert_eq!(repo.count_all_starting_from(ids[2], None).await.unwrap(), 2);
    assert_eq!(repo.count_all_starting_from(0, Some(right)).await.unwrap(), 1);
    assert_eq!(repo.latest_aggregate_version(left).await.unwrap(), 3);
    assert_eq!(repo.latest_aggregate_version(Uuid::new_v4()).await.unwrap(), 0);
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_global_events_are_stored_without_version(pool: PgPool) {
    let repo = concurrent(pool).await;

    let stored = repo
        .persist_many(vec![pending("tick", 1), pending("tick", 2)], None, None)
        .await
        .unwrap();

    assert_eq!(versions(&stored), vec![None, None]);
    assert!(stored.iter().all(|e| e.aggregate_uuid.is_none()));
}

// --- concurrent variant ---

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_stale_fence_conflicts_before_writing(pool: PgPool) {
    // Arrange
    let repo = concurrent(pool).await;
    let uuid = Uuid::new_v4();
    repo.persist_many(vec![pending("a", 1)], Some(uuid), Some(0))
        .await
        .unwrap();

    // Act
    let result = repo
        .persist_many(vec![pending("b", 2), pending("c", 3)], Some(uuid), Some(0))
        .await;

    // Assert
    match result {
        Err(DomainError::ConcurrencyConflict {
            aggregate_uuid,
            expected,
            actual,
            ..
        }) => {
            assert_eq!(aggregate_uuid, uuid);
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(repo.count_all_starting_from(0, Some(uuid)).await.unwrap(), 1);
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_empty_batch_skips_fence_check(pool: PgPool) {
    let repo = concurrent(pool).await;
    let uuid = Uuid::new_v4();
    repo.persist_many(vec![pending("a", 1)], Some(uuid), Some(0))
        .await
        .unwrap();

    let stored = repo.persist_many(Vec::new(), Some(uuid), Some(0)).await.unwrap();

    assert!(stored.is_empty());
    assert_eq!(repo.count_all_starting_from(0, Some(uuid)).await.unwrap(), 1);
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_racing_writers_one_wins(pool: PgPool) {
    // Arrange
    let repo = Arc::new(concurrent(pool).await);
    let uuid = Uuid::new_v4();

    // Act
    let writers = (0..2).map(|n| {
        let repo = Arc::clone(&repo);
        tokio::spawn(async move {
            repo.persist_many(
                vec![pending("race", n), pending("race", n + 10)],
                Some(uuid),
                Some(0),
            )
            .await
        })
    });
    let mut results = Vec::new();
    for writer in writers.collect::<Vec<_>>() {
        results.push(writer.await.unwrap());
    }

    // Assert
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_concurrency_conflict()))
        .count();
    assert_eq!((wins, conflicts), (1, 1));
    assert_eq!(repo.count_all_starting_from(0, Some(uuid)).await.unwrap(), 2);
    assert_eq!(repo.latest_aggregate_version(uuid).await.unwrap(), 2);
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_lock_wait_times_out(pool: PgPool) {
    // Arrange
    let config = EventStoreConfig {
        lock_timeout: Some(Duration::from_millis(100)),
        ..EventStoreConfig::default()
    };
    provisioned(&pool, &config).await;
    let repo = PgConcurrentEventRepository::new(pool.clone(), &config).unwrap();
    let uuid = Uuid::new_v4();

    let mut holder = pool.begin().await.unwrap();
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
        .bind(uuid.to_string())
        .execute(&mut *holder)
        .await
        .unwrap();

    // Act
    let result = repo
        .persist_many(vec![pending("a", 1)], Some(uuid), Some(0))
        .await;
    holder.rollback().await.unwrap();

    // Assert
    assert!(
        matches!(result, Err(DomainError::LockTimeout(_))),
        "expected LockTimeout, got {result:?}"
    );
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_uuid_without_version_is_invalid(pool: PgPool) {
    let repo = concurrent(pool).await;

    let result = repo.persist(pending("a", 1), Some(Uuid::new_v4()), None).await;

    assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
}

// --- strict variant ---

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_strict_bumps_colliding_version_once(pool: PgPool) {
    // Arrange
    let repo = strict(pool).await;
    let uuid = Uuid::new_v4();
    repo.persist(pending("a", 1), Some(uuid), Some(1)).await.unwrap();

    // Act
    let stored = repo
        .persist_many(vec![pending("b", 2), pending("c", 3)], Some(uuid), Some(0))
        .await
        .unwrap();

    // Assert
    assert_eq!(versions(&stored), vec![Some(2), Some(3)]);
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_strict_second_collision_rolls_back_batch(pool: PgPool) {
    // Arrange
    let repo = strict(pool).await;
    let uuid = Uuid::new_v4();
    repo.persist_many(vec![pending("a", 1), pending("b", 2), pending("c", 3)], Some(uuid), Some(0))
        .await
        .unwrap();

    // Act
    let result = repo
        .persist_many(vec![pending("d", 4), pending("e", 5)], Some(uuid), Some(1))
        .await;

    // Assert
    match result {
        Err(DomainError::ConcurrencyConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 3);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(repo.count_all_starting_from(0, Some(uuid)).await.unwrap(), 3);
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_strict_collision_inside_batch_reports_writer_fence(pool: PgPool) {
    // Arrange
    let repo = strict(pool).await;
    let uuid = Uuid::new_v4();
    repo.persist(pending("a", 1), Some(uuid), Some(2)).await.unwrap();
    repo.persist(pending("b", 2), Some(uuid), Some(3)).await.unwrap();

    // Act
    let result = repo
        .persist_many(vec![pending("c", 3), pending("d", 4)], Some(uuid), Some(0))
        .await;

    // Assert
    match result {
        Err(DomainError::ConcurrencyConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 3);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(repo.count_all_starting_from(0, Some(uuid)).await.unwrap(), 2);
}

// --- update ---

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_update_rewrites_payload_and_meta_data(pool: PgPool) {
    let repo = concurrent(pool).await;
    let uuid = Uuid::new_v4();
    let mut stored = repo.persist(pending("a", 1), Some(uuid), Some(1)).await.unwrap();
    stored.event_properties = serde_json::json!({ "n": 99 });
    stored.meta_data = serde_json::json!({ "corrected": true });

    let updated = repo.update(&stored).await.unwrap();

    assert_eq!(updated.event_properties, serde_json::json!({ "n": 99 }));
    assert_eq!(updated.meta_data, serde_json::json!({ "corrected": true }));
    assert_eq!(updated.aggregate_version, Some(1));
}

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_update_of_unknown_id_is_not_found(pool: PgPool) {
    let repo = concurrent(pool).await;
    let stored = repo.persist(pending("a", 1), None, None).await.unwrap();
    let missing = StoredEvent {
        id: stored.id + 1000,
        ..stored
    };

    let result = repo.update(&missing).await;

    assert!(matches!(result, Err(DomainError::StoredEventNotFound(_))));
}

// --- configuration ---

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_custom_tables_and_class_aliases(pool: PgPool) {
    // Arrange
    let config = EventStoreConfig {
        stored_events_table: "ledger.account_events".to_owned(),
        snapshots_table: "ledger.account_snapshots".to_owned(),
        event_class_map: EventClassMap::new().with_alias("opened", "account.opened"),
        ..EventStoreConfig::default()
    };
    provisioned(&pool, &config).await;
    let repo = PgConcurrentEventRepository::new(pool.clone(), &config).unwrap();

    // Act
    let stored = repo
        .persist(pending("account.opened", 1), None, None)
        .await
        .unwrap();
    let raw: String = sqlx::query_scalar("SELECT event_class FROM ledger.account_events")
        .fetch_one(&pool)
        .await
        .unwrap();

    // Assert
    assert_eq!(stored.event_class, "account.opened");
    assert_eq!(raw, "opened");
}

// --- snapshots ---

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_snapshot_retrieve_returns_highest_version(pool: PgPool) {
    let config = EventStoreConfig::default();
    provisioned(&pool, &config).await;
    let repo = PgSnapshotRepository::new(pool, &config).unwrap();
    let uuid = Uuid::new_v4();
    for (version, balance) in [(5, 50), (3, 30), (5, 55)] {
        repo.persist(Snapshot {
            aggregate_uuid: uuid,
            aggregate_version: version,
            state: serde_json::json!({ "balance": balance }),
            created_at: FixedClock::reference().0,
        })
        .await
        .unwrap();
    }

    let latest = repo.retrieve(uuid).await.unwrap().unwrap();

    assert_eq!(latest.aggregate_version, 5);
    assert_eq!(latest.state, serde_json::json!({ "balance": 55 }));
    assert!(repo.retrieve(Uuid::new_v4()).await.unwrap().is_none());
}

// --- aggregate root over PostgreSQL ---

#[sqlx::test(migrations = false)]
#[ignore = "requires DATABASE_URL"]
async fn test_account_round_trip_with_snapshot(pool: PgPool) {
    // Arrange
    let config = EventStoreConfig::default();
    provisioned(&pool, &config).await;
    let persistence = eventide_event_store::persistence(pool, &config).unwrap();
    let uuid = Uuid::new_v4();

    // Act
    let mut root = AggregateRoot::<Account>::retrieve(uuid, &persistence)
        .await
        .unwrap();
    root.open("ada", FixedClock::reference().0).add_money(100);
    root.persist().await.unwrap();
    root.snapshot().await.unwrap();
    root.add_money(20).add_money(5);
    root.persist().await.unwrap();

    let retrieved = AggregateRoot::<Account>::retrieve(uuid, &persistence)
        .await
        .unwrap();

    // Assert
    assert_eq!(retrieved.aggregate_version(), 4);
    assert_eq!(retrieved.state().balance, 125);
    assert_eq!(retrieved.state().owner.as_deref(), Some("ada"));
}

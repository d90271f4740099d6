//! Queue and status store against a real Postgres. Each test gets a fresh
//! database; tests are skipped when `DATABASE_URL` is not set.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use uuid::Uuid;

use formrelay::models::SubmissionStatus;
use formrelay::queue::{PgQueue, Queue, QueueError};
use formrelay::status::{PgStatusStore, StatusStore};

struct TestDb {
    pool: PgPool,
    db_name: String,
    admin_url: String,
}

async fn spawn_db() -> Option<TestDb> {
    let _ = dotenvy::dotenv();

    let Ok(base_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping Postgres test");
        return None;
    };

    // Create a unique test database
    let db_name = format!("formrelay_test_{}", Uuid::now_v7().simple());

    // Connect to default postgres DB to create test DB
    let admin_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/postgres"))
        .unwrap_or_else(|| base_url.clone());

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url)
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");

    admin_pool.close().await;

    let test_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| base_url.clone());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&test_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    Some(TestDb {
        pool,
        db_name,
        admin_url,
    })
}

/// Drop the test database after the test completes.
async fn cleanup(db: TestDb) {
    db.pool.close().await;

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&db.admin_url)
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!(
        "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
        db.db_name
    ))
    .execute(&admin_pool)
    .await;

    admin_pool.close().await;
}

async fn queue(db: &TestDb, lease: Duration) -> PgQueue {
    PgQueue::connect(db.pool.clone(), "form_submissions", lease)
        .await
        .expect("Failed to connect queue")
}

#[tokio::test]
async fn pg_queue_is_fifo_and_byte_exact() {
    let Some(db) = spawn_db().await else { return };
    let queue = queue(&db, Duration::from_secs(600)).await;

    let payloads: Vec<Vec<u8>> = (0..20)
        .map(|i| format!(r#"{{"id":"{i}","department":"Dept {i}"}}"#).into_bytes())
        .collect();
    for payload in &payloads {
        queue.enqueue(payload).await.unwrap();
    }

    for payload in &payloads {
        let entry = queue.dequeue().await.unwrap();
        assert_eq!(&entry.payload, payload);
        queue.ack(&entry).await.unwrap();
    }
    assert_eq!(queue.len().await.unwrap(), 0);

    drop(queue);
    cleanup(db).await;
}

#[tokio::test]
async fn pg_queue_wakes_blocked_consumer() {
    let Some(db) = spawn_db().await else { return };
    let queue = Arc::new(queue(&db, Duration::from_secs(600)).await);

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.dequeue().await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!consumer.is_finished());

    queue.enqueue(b"wake up").await.unwrap();
    let entry = tokio::time::timeout(Duration::from_secs(10), consumer)
        .await
        .expect("consumer was not woken by the notification")
        .unwrap();
    assert_eq!(entry.payload, b"wake up".to_vec());

    drop(queue);
    cleanup(db).await;
}

#[tokio::test]
async fn pg_queue_entries_survive_a_reconnect() {
    let Some(db) = spawn_db().await else { return };

    let producer = queue(&db, Duration::from_secs(600)).await;
    producer.enqueue(b"one").await.unwrap();
    producer.enqueue(b"two").await.unwrap();
    drop(producer);

    let consumer = queue(&db, Duration::from_secs(600)).await;
    assert_eq!(consumer.len().await.unwrap(), 2);
    assert_eq!(consumer.dequeue().await.unwrap().payload, b"one".to_vec());

    drop(consumer);
    cleanup(db).await;
}

#[tokio::test]
async fn pg_queue_redelivers_after_lease_or_release() {
    let Some(db) = spawn_db().await else { return };
    let queue = queue(&db, Duration::from_secs(1)).await;

    queue.enqueue(b"first").await.unwrap();
    queue.enqueue(b"second").await.unwrap();

    // A claimed entry is invisible to other consumers until released
    let first = queue.dequeue().await.unwrap();
    let second = queue.dequeue().await.unwrap();
    assert_eq!(second.payload, b"second".to_vec());

    queue.release(&first).await.unwrap();
    let again = queue.dequeue().await.unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.deliveries, 2);
    queue.ack(&again).await.unwrap();

    // "second" was never acknowledged: it comes back once the lease lapses
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let redelivered = tokio::time::timeout(Duration::from_secs(60), queue.dequeue())
        .await
        .expect("expired lease was not redelivered")
        .unwrap();
    assert_eq!(redelivered.id, second.id);
    assert_eq!(redelivered.deliveries, 2);
    queue.ack(&redelivered).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 0);

    drop(queue);
    cleanup(db).await;
}

#[tokio::test]
async fn pg_queue_lapsed_claim_cannot_ack_or_release() {
    let Some(db) = spawn_db().await else { return };
    let slow = queue(&db, Duration::from_secs(1)).await;
    let fast = queue(&db, Duration::from_secs(1)).await;

    slow.enqueue(b"contested").await.unwrap();
    let lapsed = slow.dequeue().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let current = fast.dequeue().await.unwrap();
    assert_eq!(current.id, lapsed.id);
    assert_eq!(current.deliveries, lapsed.deliveries + 1);

    // The first consumer finishing late must not delete or free the new claim
    assert!(matches!(
        slow.ack(&lapsed).await,
        Err(QueueError::ClaimLost { .. })
    ));
    assert!(matches!(
        slow.release(&lapsed).await,
        Err(QueueError::ClaimLost { .. })
    ));
    assert_eq!(fast.len().await.unwrap(), 1);

    fast.ack(&current).await.unwrap();
    assert_eq!(fast.len().await.unwrap(), 0);

    drop(slow);
    drop(fast);
    cleanup(db).await;
}

#[tokio::test]
async fn pg_queue_stopped_consumer_leaves_entries_unclaimed() {
    let Some(db) = spawn_db().await else { return };
    let queue = Arc::new(queue(&db, Duration::from_secs(600)).await);
    let (stop, mut rx) = watch::channel(false);

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.dequeue_until(&mut rx).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.send(true).unwrap();

    let next = tokio::time::timeout(Duration::from_secs(10), consumer)
        .await
        .expect("consumer ignored stop")
        .unwrap();
    assert_eq!(next, None);

    // Nothing was left claimed: a fresh entry is immediately available
    queue.enqueue(b"after stop").await.unwrap();
    let (_keep, mut running) = watch::channel(false);
    let entry = queue.dequeue_until(&mut running).await.unwrap().unwrap();
    assert_eq!(entry.payload, b"after stop".to_vec());
    assert_eq!(entry.deliveries, 1);

    let mut stopped = stop.subscribe();
    assert_eq!(queue.dequeue_until(&mut stopped).await.unwrap(), None);

    drop(queue);
    cleanup(db).await;
}

#[tokio::test]
async fn pg_status_store_honours_ttl() {
    let Some(db) = spawn_db().await else { return };
    let statuses = PgStatusStore::new(db.pool.clone());
    let id = Uuid::new_v4();

    assert_eq!(statuses.get_status(id).await.unwrap(), None);

    statuses
        .set_status(id, SubmissionStatus::Completed, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(
        statuses.get_status(id).await.unwrap(),
        Some(SubmissionStatus::Completed)
    );

    let key: String = sqlx::query_scalar("SELECT key FROM submission_status")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(key, format!("submission_status:{id}"));

    let short = Uuid::new_v4();
    statuses
        .set_status(short, SubmissionStatus::Failed, Duration::from_millis(200))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(statuses.get_status(short).await.unwrap(), None);
    assert_eq!(statuses.purge_expired().await.unwrap(), 1);
    assert_eq!(
        statuses.get_status(id).await.unwrap(),
        Some(SubmissionStatus::Completed)
    );

    cleanup(db).await;
}

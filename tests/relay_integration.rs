//! Integration tests for the vote relay.
//!
//! Uses TestContainers for Redis and PostgreSQL. Pattern: Single Instance +
//! Resource Pooling — one container of each kind shared across tests, with
//! each test working on its own voter ids.

use std::time::Duration;

use redis::AsyncCommands;
use sqlx::{Connection, PgConnection};
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::{postgres::Postgres, redis::Redis};
use tokio::sync::OnceCell;
use tokio::time::sleep;

use vote_relay::config::{RetryPolicy, Settings};
use vote_relay::queue::{QueueClient, VOTES_QUEUE};
use vote_relay::relay::Relay;
use vote_relay::store::RecordStore;

/// Container info for resource pooling
struct PostgresTestContext {
    _container: ContainerAsync<Postgres>,
    url: String,
}

struct RedisTestContext {
    _container: ContainerAsync<Redis>,
    url: String,
}

/// Global container instances (Single Instance pattern)
static POSTGRES_CONTEXT: OnceCell<PostgresTestContext> = OnceCell::const_new();
static REDIS_CONTEXT: OnceCell<RedisTestContext> = OnceCell::const_new();

async fn get_postgres_context() -> &'static PostgresTestContext {
    POSTGRES_CONTEXT
        .get_or_init(|| async {
            let container = Postgres::default()
                .with_tag("16-alpine")
                .start()
                .await
                .expect("Failed to start Postgres container");

            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get port");

            let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            PostgresTestContext {
                _container: container,
                url,
            }
        })
        .await
}

async fn get_redis_context() -> &'static RedisTestContext {
    REDIS_CONTEXT
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("Failed to start Redis container");

            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(6379)
                .await
                .expect("Failed to get port");

            let url = format!("redis://{}:{}", host, port);

            RedisTestContext {
                _container: container,
                url,
            }
        })
        .await
}

fn test_retry_policy() -> RetryPolicy {
    RetryPolicy::capped(Duration::from_millis(100), 10)
}

/// Create a store connected to the shared container (schema-ensured)
async fn create_test_store() -> RecordStore {
    let ctx = get_postgres_context().await;
    RecordStore::connect(&ctx.url, &test_retry_policy())
        .await
        .expect("Failed to connect to Postgres")
}

async fn create_test_queue() -> QueueClient {
    let ctx = get_redis_context().await;
    QueueClient::connect(&ctx.url, &test_retry_policy())
        .await
        .expect("Failed to connect to Redis")
}

/// Read the stored vote for a voter through a fresh connection
async fn stored_vote(voter_id: &str) -> Option<String> {
    let ctx = get_postgres_context().await;
    let mut conn = PgConnection::connect(&ctx.url)
        .await
        .expect("Failed to connect for verification");
    sqlx::query_scalar("SELECT vote FROM votes WHERE id = $1")
        .bind(voter_id)
        .fetch_optional(&mut conn)
        .await
        .expect("Failed to query votes")
}

async fn stored_row_count(voter_id: &str) -> i64 {
    let ctx = get_postgres_context().await;
    let mut conn = PgConnection::connect(&ctx.url)
        .await
        .expect("Failed to connect for verification");
    sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE id = $1")
        .bind(voter_id)
        .fetch_one(&mut conn)
        .await
        .expect("Failed to count votes")
}

/// Poll until the stored vote for `voter_id` equals `expected`
async fn wait_for_vote(voter_id: &str, expected: &str) -> anyhow::Result<()> {
    for _ in 0..100 {
        if stored_vote(voter_id).await.as_deref() == Some(expected) {
            return Ok(());
        }
        sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!(
        "vote for {} never became {:?} (last seen: {:?})",
        voter_id,
        expected,
        stored_vote(voter_id).await
    )
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn upsert_creates_then_overwrites() {
    let mut store = create_test_store().await;

    store
        .upsert_vote("it-overwrite", "a")
        .await
        .expect("First upsert failed");
    assert_eq!(stored_vote("it-overwrite").await.as_deref(), Some("a"));

    store
        .upsert_vote("it-overwrite", "b")
        .await
        .expect("Second upsert failed");
    assert_eq!(stored_vote("it-overwrite").await.as_deref(), Some("b"));

    // Still exactly one row for this voter
    assert_eq!(stored_row_count("it-overwrite").await, 1);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn upsert_new_voter_creates_single_row() {
    let mut store = create_test_store().await;

    store
        .upsert_vote("it-fresh", "a")
        .await
        .expect("Upsert failed");

    assert_eq!(stored_vote("it-fresh").await.as_deref(), Some("a"));
    assert_eq!(stored_row_count("it-fresh").await, 1);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn pop_on_empty_queue_returns_none() {
    let mut queue = create_test_queue().await;

    // No producer has pushed anything for this test; LPOP must come back
    // empty right away rather than blocking.
    let event = queue.pop_event().await.expect("Pop failed");
    assert!(event.is_none());
    assert!(queue.is_alive());
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn keepalive_pings_keep_connection_usable() {
    let mut store = create_test_store().await;

    for _ in 0..10 {
        store.ping().await.expect("Keep-alive ping failed");
    }

    assert!(store.is_alive());
    store
        .upsert_vote("it-keepalive", "a")
        .await
        .expect("Upsert after pings failed");
    assert_eq!(stored_vote("it-keepalive").await.as_deref(), Some("a"));
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn relay_end_to_end_latest_vote_wins() {
    let pg = get_postgres_context().await;
    let rd = get_redis_context().await;

    let settings = Settings {
        queue_url: rd.url.clone(),
        database_url: pg.url.clone(),
        poll_interval: Duration::from_millis(20),
        retry_backoff: Duration::from_millis(100),
        server_bind: "127.0.0.1:0".to_string(),
    };

    // Producer side: two votes by the same voter, oldest first
    let client = redis::Client::open(rd.url.as_str()).expect("Bad Redis URL");
    let mut producer = client
        .get_multiplexed_async_connection()
        .await
        .expect("Failed to connect producer");
    let _: () = producer
        .rpush(VOTES_QUEUE, r#"{"vote": "a", "voter_id": "it-e2e"}"#)
        .await
        .expect("Failed to push first vote");
    let _: () = producer
        .rpush(VOTES_QUEUE, r#"{"vote": "b", "voter_id": "it-e2e"}"#)
        .await
        .expect("Failed to push second vote");

    let relay = Relay::connect(settings).await.expect("Relay connect failed");
    let handle = tokio::spawn(relay.run());

    let result = wait_for_vote("it-e2e", "b").await;
    handle.abort();
    result.expect("Relay never persisted the latest vote");

    assert_eq!(stored_row_count("it-e2e").await, 1);
}

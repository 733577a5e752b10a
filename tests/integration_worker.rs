//! Drenaje completo cola → store con el scheduler real. Requiere Redis y
//! PostgreSQL accesibles; se saltea cuando DATABASE_URL o REDIS_HOST no
//! están definidas.
use std::time::{Duration, Instant};

use graphflow_rust::{migrations, QueueClient, RedisConfig, Scheduler, StoreProjector, UserCache, WorkerConfig};

const TEST_QUEUE: &str = "graphflow_test_queue";

#[tokio::test]
async fn test_worker_drains_queue() -> Result<(), Box<dyn std::error::Error>> {
    let db_url = std::env::var("DATABASE_URL").unwrap_or_default();
    if db_url.is_empty() || std::env::var("REDIS_HOST").is_err() {
        eprintln!("DATABASE_URL / REDIS_HOST not set; skipping worker integration test");
        return Ok(());
    }

    let pool = sqlx::PgPool::connect(&db_url).await?;
    migrations::ensure_schema(&pool).await?;
    sqlx::query("TRUNCATE transaction_logs, friendships, referrals, users RESTART IDENTITY CASCADE").execute(&pool)
                                                                                                    .await?;

    let redis_cfg = RedisConfig::from_env();
    let client = redis::Client::open(redis_cfg.url())?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: () = redis::AsyncCommands::del(&mut conn, TEST_QUEUE).await?;

    // Productor sintético: LPUSH de payloads JSON, con uno malformado en el
    // medio que el decoder debe descartar sin afectar al resto.
    let payloads = vec![r#"{"type":"register","name":"w_alice","created_at":"2024-01-01T12:00:00.000Z"}"#.to_string(),
                        r#"{"type":"register","name":"w_bob","created_at":"2024-01-01T12:00:01.000Z"}"#.to_string(),
                        r#"{"type":"garbage"}"#.to_string(),
                        r#"{"type":"addfriend","user1_name":"w_alice","user2_name":"w_bob","created_at":"2024-01-01T12:00:02.000Z"}"#.to_string(),
                        r#"{"type":"referral","referredBy":"w_alice","user":"w_carol","created_at":"2024-01-01T12:00:03.000Z"}"#.to_string()];
    let expected_events = 4usize; // el payload basura no cuenta
    let _: () = redis::AsyncCommands::lpush(&mut conn, TEST_QUEUE, &payloads).await?;

    let queue = QueueClient::connect(&redis_cfg).await?;
    assert_eq!(queue.queue_length(TEST_QUEUE).await?, payloads.len());

    let cfg = WorkerConfig { batch_size: 100,
                             queue_name: TEST_QUEUE.to_string(),
                             concurrency: 2,
                             max_retries: 3 };
    let cache = UserCache::connect(pool.clone(), cfg.max_retries).await?;
    let projector = StoreProjector::new(pool.clone());
    let mut scheduler = Scheduler::new(queue.clone(), cache, projector, cfg);
    scheduler.start();

    // Esperar el drenaje completo con tope de tiempo.
    let deadline = Instant::now() + Duration::from_secs(15);
    while scheduler.processed() < expected_events as u64 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    scheduler.stop().await;

    assert_eq!(scheduler.processed(), expected_events as u64);
    assert_eq!(scheduler.failed_batches(), 0);
    assert_eq!(queue.queue_length(TEST_QUEUE).await?, 0);

    let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users").fetch_one(&pool).await?;
    assert_eq!(users, 3); // w_alice, w_bob, w_carol
    let (friendships,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM friendships WHERE status = 'ACTIVE'").fetch_one(&pool)
                                                                                                           .await?;
    assert_eq!(friendships, 1);
    let (referrals,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM referrals").fetch_one(&pool).await?;
    assert_eq!(referrals, 1);
    let (logs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transaction_logs").fetch_one(&pool).await?;
    assert_eq!(logs, expected_events as i64);

    Ok(())
}

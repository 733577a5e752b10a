//! Binario del worker de proyección.
//!
//! Ciclo de vida: cargar .env y configuración, conectar a PostgreSQL (creando
//! la base si falta) y a Redis, asegurar el esquema, poblar la caché de
//! usuarios y arrancar el scheduler. SIGINT/SIGTERM disparan la detención
//! ordenada (los lotes en vuelo terminan antes de salir). Cualquier error de
//! inicialización termina el proceso con código distinto de cero.
use graphflow_rust::{config, migrations, DatabaseConfig, QueueClient, RedisConfig, Scheduler, StoreProjector, UserCache,
                     WorkerConfig, WorkerError};

#[tokio::main]
async fn main() {
    config::init_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run().await {
        eprintln!("[graphflow] fatal initialization error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), WorkerError> {
    let db_cfg = DatabaseConfig::from_env()?;
    let redis_cfg = RedisConfig::from_env();
    let worker_cfg = WorkerConfig::from_env();

    let pool = config::create_pool(&db_cfg).await?;
    migrations::ensure_schema(&pool).await?;

    let queue = QueueClient::connect(&redis_cfg).await?;
    let cache = UserCache::connect(pool.clone(), worker_cfg.max_retries).await?;
    let projector = StoreProjector::new(pool.clone());

    let mut scheduler = Scheduler::new(queue, cache, projector, worker_cfg);
    scheduler.start();
    println!("[graphflow] worker running (Ctrl-C to stop)");

    wait_for_shutdown().await;
    println!("[graphflow] shutdown signal received, draining in-flight batches...");
    scheduler.stop().await;
    pool.close().await;
    println!("[graphflow] bye");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            eprintln!("[graphflow] cannot install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}

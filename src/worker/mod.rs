//! Scheduler de workers concurrentes.
//!
//! Lanza `N` worker loops independientes (pop → decode → plan → ensure ids →
//! project) más una tarea de monitoreo que reporta throughput periódicamente.
//! Todos comparten la misma caché de identidad, el cliente de cola y el pool
//! del store.
//!
//! Con `N > 1`, `ensure_users_exist` concurrente sobre conjuntos de nombres
//! solapados y upserts de amistad sobre pares solapados pueden producir
//! deadlocks en la base; el protocolo de reintento del proyector es la
//! mitigación. La recomendación operativa documentada es `N = 1` con lotes
//! grandes, pero el scheduler es correcto a cualquier concurrencia.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use crate::batch;
use crate::cache::UserCache;
use crate::config::WorkerConfig;
use crate::database::StoreProjector;
use crate::errors::WorkerError;
use crate::events::{decode_batch, Event};
use crate::queue::QueueClient;

/// Espera cuando la cola está vacía.
const IDLE_SLEEP: Duration = Duration::from_millis(50);
/// Espera tras un lote fallido antes de continuar.
const ERROR_SLEEP: Duration = Duration::from_millis(200);
/// Período del reporte de throughput.
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

struct Shared {
    queue: QueueClient,
    cache: UserCache,
    projector: StoreProjector,
    cfg: WorkerConfig,
    running: AtomicBool,
    processed: AtomicU64,
    failed_batches: AtomicU64,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(queue: QueueClient, cache: UserCache, projector: StoreProjector, cfg: WorkerConfig) -> Self {
        Self { shared: Arc::new(Shared { queue,
                                         cache,
                                         projector,
                                         cfg,
                                         running: AtomicBool::new(false),
                                         processed: AtomicU64::new(0),
                                         failed_batches: AtomicU64::new(0) }),
               handles: Vec::new() }
    }

    /// Lanza los worker loops y la tarea de monitoreo.
    pub fn start(&mut self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler already running");
            return;
        }
        for worker_id in 0..self.shared.cfg.concurrency {
            let shared = Arc::clone(&self.shared);
            self.handles.push(tokio::spawn(worker_loop(shared, worker_id)));
        }
        let shared = Arc::clone(&self.shared);
        self.handles.push(tokio::spawn(monitor_loop(shared)));
        info!("scheduler started: {} workers, batch_size={}, queue='{}'",
              self.shared.cfg.concurrency,
              self.shared.cfg.batch_size,
              self.shared.cfg.queue_name);
    }

    /// Detención ordenada: baja la bandera y espera a que cada tarea termine
    /// su iteración en curso (las transacciones en vuelo finalizan, acotadas
    /// por el statement_timeout).
    pub async fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("scheduler stopped: {} events projected, {} failed batches",
              self.shared.processed.load(Ordering::Relaxed),
              self.shared.failed_batches.load(Ordering::Relaxed));
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Total de eventos proyectados desde el arranque.
    pub fn processed(&self) -> u64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    pub fn failed_batches(&self) -> u64 {
        self.shared.failed_batches.load(Ordering::Relaxed)
    }
}

async fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    debug!("worker {worker_id} started");
    while shared.running.load(Ordering::SeqCst) {
        let started = Instant::now();
        let raw = match shared.queue.pop_batch(&shared.cfg.queue_name, shared.cfg.batch_size).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("worker {worker_id}: queue pop failed: {e}");
                tokio::time::sleep(ERROR_SLEEP).await;
                continue;
            }
        };
        let events = decode_batch(&raw);
        if events.is_empty() {
            tokio::time::sleep(IDLE_SLEEP).await;
            continue;
        }
        let count = events.len();
        match project_events(&shared, events).await {
            Ok(()) => {
                shared.processed.fetch_add(count as u64, Ordering::Relaxed);
                let elapsed = started.elapsed();
                let rate = count as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
                info!("worker {worker_id}: projected {count} events in {elapsed:?} ({rate:.0} ev/s)");
            }
            Err(e) => {
                shared.failed_batches.fetch_add(1, Ordering::Relaxed);
                error!("worker {worker_id}: batch of {count} events failed: {e}");
                tokio::time::sleep(ERROR_SLEEP).await;
            }
        }
    }
    debug!("worker {worker_id} stopped");
}

async fn project_events(shared: &Shared, events: Vec<Event>) -> Result<(), WorkerError> {
    let plan = batch::plan(&events);
    let ids = shared.cache.ensure_users_exist(&plan.new_users).await?;
    let resolved = batch::resolve(plan, &ids)?;
    shared.projector.commit(&resolved).await?;
    Ok(())
}

async fn monitor_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(REPORT_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_total = shared.processed.load(Ordering::Relaxed);
    let mut last_tick = Instant::now();
    // El primer tick es inmediato; sirve como línea de arranque del reporte.
    interval.tick().await;
    while shared.running.load(Ordering::SeqCst) {
        interval.tick().await;
        let total = shared.processed.load(Ordering::Relaxed);
        let delta = total - last_total;
        let elapsed = last_tick.elapsed().as_secs_f64().max(f64::EPSILON);
        let depth = match shared.queue.queue_length(&shared.cfg.queue_name).await {
            Ok(len) => len.to_string(),
            Err(e) => {
                debug!("monitor: queue length unavailable: {e}");
                "?".to_string()
            }
        };
        info!("throughput: {delta} events ({:.0} ev/s), total={total}, queue_depth={depth}", delta as f64 / elapsed);
        last_total = total;
        last_tick = Instant::now();
    }
    debug!("monitor stopped");
}

//! Pipeline de proyección de eventos de grafo social.
//!
//! Flujo general: **productor → cola Redis → [worker: pop → decode → plan →
//! project → PostgreSQL]**.
//!
//! Módulos:
//! - `queue`: adaptador de la cola Redis (multi-pop pipelined + fallback).
//! - `events`: variante cerrada `Event` y decodificador tolerante.
//! - `cache`: caché de identidad `nombre → id` con TTL y single-flight.
//! - `batch`: planificador de lotes (deduplicación, coalescing y resolución
//!   de ids con canonicalización de pares).
//! - `database`: proyector transaccional con reintento ante deadlocks.
//! - `worker`: scheduler de N workers concurrentes + tarea de monitoreo.
//! - `migrations`: creación idempotente del esquema.
pub mod batch;
pub mod cache;
pub mod config;
pub mod database;
pub mod errors;
pub mod events;
pub mod migrations;
pub mod queue;
pub mod retry;
pub mod worker;

pub use batch::{plan, resolve, BatchPlan, ResolvedBatch};
pub use cache::UserCache;
pub use config::{DatabaseConfig, RedisConfig, WorkerConfig};
pub use database::StoreProjector;
pub use errors::{DecodeError, StoreError, WorkerError};
pub use events::Event;
pub use queue::QueueClient;
pub use worker::Scheduler;

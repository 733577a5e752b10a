//! Taxonomía de errores del worker.
//! Separa fallas de decodificación (se descartan por evento), errores de la
//! cola, errores semánticos del store y errores de configuración fatales.
mod store_error;

pub use store_error::StoreError;

use thiserror::Error;

/// Error de decodificación de un payload individual de la cola. Nunca escala
/// más allá del evento: el lote continúa sin él.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty name field")]
    EmptyName,
    #[error("name too long: {0} chars")]
    NameTooLong(usize),
}

/// Error de nivel worker: agrupa las fallas observables por el loop principal
/// y por la inicialización del proceso.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] redis::RedisError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("name not resolved to an id: {0}")]
    UnresolvedName(String),
}

impl From<sqlx::Error> for WorkerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}

//! Capa de persistencia: proyección transaccional de lotes sobre PostgreSQL.
mod projector;

pub use projector::{StoreProjector, MAX_TX_RETRIES};

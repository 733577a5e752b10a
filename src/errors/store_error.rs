//! Errores de persistencia.
//! Mapea errores de sqlx / conexión a variantes semánticas del dominio de
//! persistencia. La clasificación de deadlocks alimenta los dos puntos de
//! reintento (creación de usuarios y transacción de proyección).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("deadlock detected: {0}")]
    Deadlock(String),
    #[error("statement timeout")]
    Timeout,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
                let message = db_err.message().to_string();
                match code.as_str() {
                    "23505" => Self::UniqueViolation(message),
                    "40P01" => Self::Deadlock(message),
                    "57014" => Self::Timeout, // query_canceled por statement_timeout
                    // Algunos drivers/proxies no reportan SQLSTATE; best-effort
                    // string match sin acoplar al código.
                    _ if message.to_lowercase().contains("deadlock detected") => Self::Deadlock(message),
                    _ => Self::Unknown(format!("sqlstate {}: {}", code, message)),
                }
            }
            sqlx::Error::PoolTimedOut => Self::TransientIo("connection pool timed out".into()),
            sqlx::Error::PoolClosed => Self::TransientIo("connection pool closed".into()),
            sqlx::Error::Io(e) => Self::TransientIo(e.to_string()),
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl StoreError {
    /// Indica si el error amerita reintentar la transacción completa.
    pub fn is_deadlock(&self) -> bool {
        matches!(self, Self::Deadlock(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_maps_to_transient() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::TransientIo(_)));
        assert!(!err.is_deadlock());
    }

    #[test]
    fn row_not_found_maps_to_unknown() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Unknown(_)));
    }

    #[test]
    fn deadlock_variant_is_retryable() {
        let err = StoreError::Deadlock("deadlock detected".into());
        assert!(err.is_deadlock());
        assert!(!StoreError::UniqueViolation("dup".into()).is_deadlock());
    }
}

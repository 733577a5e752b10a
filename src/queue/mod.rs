//! Adaptador de la cola Redis.
//!
//! La cola es una lista: el productor hace LPUSH y este worker consume del
//! extremo opuesto con RPOP. La extracción por lotes envía los `n` RPOP en un
//! único round-trip pipelined; si el pipeline falla se degrada a pops
//! seriales. Nunca bloquea esperando elementos: con la cola vacía devuelve un
//! slice vacío.
//!
//! Patrón pop-then-commit: si el proceso muere entre el pop y el commit en la
//! base, esos eventos se pierden (entrega at-most-once asumida). El upgrade a
//! RPOPLPUSH con lista de procesamiento queda deliberadamente fuera.
use log::warn;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::RedisConfig;
use crate::errors::WorkerError;

/// Cliente de cola compartible entre workers: `ConnectionManager` multiplexa
/// una única conexión y sus clones son baratos.
#[derive(Clone)]
pub struct QueueClient {
    conn: ConnectionManager,
}

impl QueueClient {
    /// Conecta contra Redis según configuración. Error aquí es fatal para el
    /// arranque del proceso.
    pub async fn connect(cfg: &RedisConfig) -> Result<Self, WorkerError> {
        let client = redis::Client::open(cfg.url())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Extrae hasta `n` payloads en un único round-trip pipelined y devuelve
    /// el prefijo no nulo en orden de pop. Ante un fallo del pipeline degrada
    /// a RPOPs seriales.
    pub async fn pop_batch(&self, queue: &str, n: usize) -> Result<Vec<String>, WorkerError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for _ in 0..n {
            pipe.cmd("RPOP").arg(queue);
        }
        let piped: Result<Vec<Option<String>>, redis::RedisError> = pipe.query_async(&mut conn).await;
        match piped {
            Ok(values) => Ok(values.into_iter().take_while(Option::is_some).flatten().collect()),
            Err(e) => {
                warn!("pipelined pop failed, falling back to serial pops: {e}");
                self.pop_serial(queue, n).await
            }
        }
    }

    async fn pop_serial(&self, queue: &str, n: usize) -> Result<Vec<String>, WorkerError> {
        let mut conn = self.conn.clone();
        let mut out = Vec::new();
        for _ in 0..n {
            let item: Option<String> = conn.rpop(queue, None).await?;
            match item {
                Some(payload) => out.push(payload),
                None => break,
            }
        }
        Ok(out)
    }

    /// Longitud actual de la lista.
    pub async fn queue_length(&self, queue: &str) -> Result<usize, WorkerError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(queue).await?)
    }
}

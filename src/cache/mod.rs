//! Caché de identidad de usuarios (`nombre → id`).
//!
//! Responsabilidades clave:
//! - Warm-up con scan completo de la tabla `users` al conectar.
//! - Refresco completo cuando el snapshot supera el TTL (30 s): el mapa nuevo
//!   reemplaza atómicamente al anterior bajo write-lock, de modo que los
//!   lectores ven el snapshot viejo o el nuevo, nunca un estado parcial.
//! - Creación perezosa y segura de usuarios desconocidos: cada nombre pasa
//!   por un slot single-flight, así lotes concurrentes que encuentran el
//!   mismo nombre nuevo dentro del proceso disparan un solo INSERT.
//!
//! Mantener la creación de usuarios fuera de la transacción de proyección
//! acorta su sección crítica: la transacción externa opera sobre ids ya
//! estables, lo que reduce contención de row-locks entre workers.
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::errors::StoreError;
use crate::retry::backoff_with_jitter;

/// TTL del snapshot completo del mapa de usuarios.
pub const CACHE_TTL: Duration = Duration::from_secs(30);

pub struct UserCache {
    pool: sqlx::Pool<sqlx::Postgres>,
    entries: RwLock<HashMap<String, i64>>,
    last_refresh: RwLock<Option<Instant>>,
    /// Slots single-flight por nombre: demandas concurrentes del mismo nombre
    /// comparten una única resolución en vuelo.
    inflight: Mutex<HashMap<String, Arc<OnceCell<i64>>>>,
    max_retries: u32,
}

impl UserCache {
    /// Construye la caché y la puebla con un scan completo de `users`.
    pub async fn connect(pool: sqlx::Pool<sqlx::Postgres>, max_retries: u32) -> Result<Self, StoreError> {
        let cache = Self { pool,
                           entries: RwLock::new(HashMap::new()),
                           last_refresh: RwLock::new(None),
                           inflight: Mutex::new(HashMap::new()),
                           max_retries };
        cache.refresh().await?;
        Ok(cache)
    }

    /// Re-scan completo de la tabla; reemplaza el mapa de una sola vez.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM users").fetch_all(&self.pool).await?;
        let fresh: HashMap<String, i64> = rows.into_iter().map(|(id, name)| (name, id)).collect();
        let count = fresh.len();
        *self.entries.write().await = fresh;
        *self.last_refresh.write().await = Some(Instant::now());
        debug!("user cache refreshed: {count} entries");
        Ok(())
    }

    /// Refresca sólo si el snapshot actual superó el TTL.
    pub async fn refresh_if_stale(&self) -> Result<(), StoreError> {
        let stale = match *self.last_refresh.read().await {
            Some(at) => at.elapsed() > CACHE_TTL,
            None => true,
        };
        if stale {
            self.refresh().await?;
        }
        Ok(())
    }

    /// Cantidad de entradas cacheadas (diagnóstico / tests).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Garantiza que todos los `names` existan en `users` y devuelve el mapa
    /// `nombre → id`. Los hits se responden desde el snapshot; cada miss se
    /// resuelve vía single-flight con el protocolo insert-or-lookup.
    pub async fn ensure_users_exist(&self, names: &BTreeSet<String>) -> Result<HashMap<String, i64>, StoreError> {
        self.refresh_if_stale().await?;
        let mut resolved = HashMap::with_capacity(names.len());
        let mut misses: Vec<&String> = Vec::new();
        {
            let entries = self.entries.read().await;
            for name in names {
                match entries.get(name) {
                    Some(&id) => {
                        resolved.insert(name.clone(), id);
                    }
                    None => misses.push(name),
                }
            }
        }
        // El orden de `names` es determinista (BTreeSet): los misses se
        // insertan siempre en orden lexicográfico, reduciendo inversiones de
        // locks entre workers concurrentes.
        for name in misses {
            let id = self.resolve_miss(name).await?;
            resolved.insert(name.clone(), id);
        }
        Ok(resolved)
    }

    async fn resolve_miss(&self, name: &str) -> Result<i64, StoreError> {
        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(name.to_string()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };
        let result = cell.get_or_try_init(|| self.insert_or_lookup(name)).await.map(|id| *id);
        {
            // El slot se retira haya éxito o no; un fallo permite que el
            // próximo demandante reintente desde cero.
            let mut inflight = self.inflight.lock().await;
            inflight.remove(name);
        }
        let id = result?;
        self.entries.write().await.insert(name.to_string(), id);
        Ok(id)
    }

    /// INSERT con absorción de la unique-violation vía ON CONFLICT DO
    /// NOTHING; si otro proceso ganó la carrera, el SELECT recupera el id.
    /// Deadlocks se reintentan con backoff exponencial + jitter.
    async fn insert_or_lookup(&self, name: &str) -> Result<i64, StoreError> {
        let mut attempt = 0;
        loop {
            match self.try_insert_or_lookup(name).await {
                Err(e) if e.is_deadlock() && attempt < self.max_retries => {
                    let delay = backoff_with_jitter(attempt);
                    warn!("deadlock creating user '{name}' (attempt {}), retrying in {delay:?}", attempt + 1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_insert_or_lookup(&self, name: &str) -> Result<i64, StoreError> {
        let inserted: Option<(i64,)> =
            sqlx::query_as("INSERT INTO users (name) VALUES ($1) ON CONFLICT (name) DO NOTHING RETURNING id").bind(name)
                                                                                                             .fetch_optional(&self.pool)
                                                                                                             .await?;
        if let Some((id,)) = inserted {
            return Ok(id);
        }
        let (id,): (i64,) = sqlx::query_as("SELECT id FROM users WHERE name = $1").bind(name).fetch_one(&self.pool).await?;
        Ok(id)
    }
}

//! Proyector de lotes sobre el store relacional.
//!
//! Materializa un `ResolvedBatch` dentro de UNA transacción con aislamiento
//! READ COMMITTED y `statement_timeout` de 60 s, en orden fijo:
//!
//! 1. Referidos: insert masivo con skip-on-conflict (duplicados por par
//!    dirigido se ignoran).
//! 2. Amistades: upsert masivo por `(user1_id, user2_id)`; en conflicto la
//!    fila vuelve a ACTIVE con `updated_at = now()`.
//! 3. Desamistades: update masivo a INACTIVE sólo sobre filas ACTIVE; pares
//!    inexistentes se ignoran.
//! 4. Log de transacciones: insert masivo, nunca deduplicado.
//!
//! Los referidos van primero porque no compiten con las amistades y drenan
//! rápido; las amistades preceden a las desamistades para que un par dado de
//! alta y de baja en el mismo lote termine INACTIVE. Sub-listas vacías no
//! emiten statement.
//!
//! Ante deadlock (SQLSTATE 40P01) se reintenta la transacción completa hasta
//! 5 veces con backoff exponencial + jitter. Cualquier otro error aborta el
//! lote: sus eventos no vuelven a la cola.
use log::{info, warn};
use sqlx::types::Json;

use crate::batch::ResolvedBatch;
use crate::errors::StoreError;
use crate::retry::backoff_with_jitter;

/// Tope de reintentos de la transacción completa ante deadlock.
pub const MAX_TX_RETRIES: u32 = 5;

#[derive(Clone)]
pub struct StoreProjector {
    pool: sqlx::Pool<sqlx::Postgres>,
}

impl StoreProjector {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self { pool }
    }

    /// Acceso de solo lectura al pool (principalmente para tests de
    /// integración).
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Proyecta el lote completo, reintentando la transacción entera ante
    /// deadlock.
    pub async fn commit(&self, batch: &ResolvedBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            match self.try_commit(batch).await {
                Err(e) if e.is_deadlock() && attempt < MAX_TX_RETRIES => {
                    let delay = backoff_with_jitter(attempt);
                    warn!("projection deadlock (attempt {}/{}), retrying in {delay:?}", attempt + 1, MAX_TX_RETRIES);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => {
                    if result.is_ok() && attempt > 0 {
                        info!("projection committed after {attempt} deadlock retries");
                    }
                    return result;
                }
            }
        }
    }

    async fn try_commit(&self, batch: &ResolvedBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED").execute(&mut *tx).await?;
        sqlx::query("SET LOCAL statement_timeout = '60s'").execute(&mut *tx).await?;

        if !batch.referrals.is_empty() {
            let (referrers, referred): (Vec<i64>, Vec<i64>) = batch.referrals.iter().copied().unzip();
            sqlx::query(
                "INSERT INTO referrals (referrer_id, referred_id)
                 SELECT * FROM UNNEST($1::bigint[], $2::bigint[]) AS t(referrer_id, referred_id)
                 ON CONFLICT (referrer_id, referred_id) DO NOTHING",
            )
            .bind(&referrers)
            .bind(&referred)
            .execute(&mut *tx)
            .await?;
        }

        if !batch.friend_upserts.is_empty() {
            // Los pares llegan canonicalizados (user1 < user2) y únicos, por
            // lo que el upsert multi-fila nunca afecta dos veces la misma
            // fila dentro del statement.
            let (user1, user2): (Vec<i64>, Vec<i64>) = batch.friend_upserts.iter().copied().unzip();
            sqlx::query(
                "INSERT INTO friendships (user1_id, user2_id, status)
                 SELECT u1, u2, 'ACTIVE' FROM UNNEST($1::bigint[], $2::bigint[]) AS t(u1, u2)
                 ON CONFLICT (user1_id, user2_id) DO UPDATE SET status = 'ACTIVE', updated_at = now()",
            )
            .bind(&user1)
            .bind(&user2)
            .execute(&mut *tx)
            .await?;
        }

        if !batch.unfriend_updates.is_empty() {
            let (user1, user2): (Vec<i64>, Vec<i64>) = batch.unfriend_updates.iter().copied().unzip();
            sqlx::query(
                "UPDATE friendships AS f SET status = 'INACTIVE', updated_at = now()
                 FROM UNNEST($1::bigint[], $2::bigint[]) AS t(u1, u2)
                 WHERE f.user1_id = t.u1 AND f.user2_id = t.u2 AND f.status = 'ACTIVE'",
            )
            .bind(&user1)
            .bind(&user2)
            .execute(&mut *tx)
            .await?;
        }

        if !batch.logs.is_empty() {
            let mut user_ids: Vec<i64> = Vec::with_capacity(batch.logs.len());
            let mut kinds: Vec<String> = Vec::with_capacity(batch.logs.len());
            let mut payloads: Vec<Json<serde_json::Value>> = Vec::with_capacity(batch.logs.len());
            for record in &batch.logs {
                user_ids.push(record.user_id);
                kinds.push(record.kind.to_string());
                payloads.push(Json(record.data.clone()));
            }
            sqlx::query(
                "INSERT INTO transaction_logs (user_id, transaction_type, transaction_data)
                 SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::jsonb[]) AS t(user_id, transaction_type, transaction_data)",
            )
            .bind(&user_ids)
            .bind(&kinds)
            .bind(&payloads)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

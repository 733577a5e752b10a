//! Creación idempotente del esquema (defensa ante BD recién creada sin
//! migraciones aplicadas). Todas las sentencias usan IF NOT EXISTS, por lo
//! que es seguro invocarla en cada arranque del worker.
use sqlx::Pool;
use sqlx::Postgres;

pub async fn ensure_schema(pool: &Pool<Postgres>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
             id BIGSERIAL PRIMARY KEY,
             name VARCHAR(255) NOT NULL UNIQUE,
             created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
             updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
         )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS friendships (
             id BIGSERIAL PRIMARY KEY,
             user1_id BIGINT NOT NULL REFERENCES users(id),
             user2_id BIGINT NOT NULL REFERENCES users(id),
             status TEXT NOT NULL DEFAULT 'ACTIVE',
             created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
             updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
             CONSTRAINT friendships_pair_unique UNIQUE (user1_id, user2_id),
             CONSTRAINT friendships_pair_order CHECK (user1_id < user2_id)
         )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS referrals (
             id BIGSERIAL PRIMARY KEY,
             referrer_id BIGINT NOT NULL REFERENCES users(id),
             referred_id BIGINT NOT NULL REFERENCES users(id),
             created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
             CONSTRAINT referrals_edge_unique UNIQUE (referrer_id, referred_id)
         )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS transaction_logs (
             id BIGSERIAL PRIMARY KEY,
             user_id BIGINT NULL REFERENCES users(id),
             transaction_type TEXT NOT NULL,
             transaction_data JSONB NOT NULL,
             processed_at TIMESTAMPTZ NOT NULL DEFAULT now()
         )",
    )
    .execute(pool)
    .await?;
    // Índices esenciales (idempotentes)
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_friendships_user2 ON friendships(user2_id)").execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transaction_logs_user ON transaction_logs(user_id)").execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transaction_logs_type ON transaction_logs(transaction_type)").execute(pool)
                                                                                                             .await?;
    Ok(())
}

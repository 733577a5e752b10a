//! Escenarios end-to-end del pipeline de proyección contra un PostgreSQL
//! real. Se saltea (sin fallar) cuando DATABASE_URL no está definida, igual
//! que el resto de la suite de integración.
use std::collections::BTreeSet;
use std::sync::Arc;

use graphflow_rust::events::decode;
use graphflow_rust::{migrations, plan, resolve, Event, StoreProjector, UserCache};

async fn project(cache: &UserCache, projector: &StoreProjector, events: Vec<Event>) -> Result<(), Box<dyn std::error::Error>> {
    let plan = plan(&events);
    let ids = cache.ensure_users_exist(&plan.new_users).await?;
    let resolved = resolve(plan, &ids)?;
    projector.commit(&resolved).await?;
    Ok(())
}

fn ev(payload: &str) -> Event {
    decode(payload).expect("payload de test válido")
}

async fn count(pool: &sqlx::PgPool, sql: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(sql).fetch_one(pool).await.expect("count query");
    n
}

async fn user_id(pool: &sqlx::PgPool, name: &str) -> i64 {
    let (id,): (i64,) = sqlx::query_as("SELECT id FROM users WHERE name = $1").bind(name)
                                                                              .fetch_one(pool)
                                                                              .await
                                                                              .expect("user id");
    id
}

#[tokio::test]
async fn test_projection_scenarios() -> Result<(), Box<dyn std::error::Error>> {
    // Skip if DATABASE_URL not set (CI condition)
    let db_url = std::env::var("DATABASE_URL").unwrap_or_default();
    if db_url.is_empty() {
        eprintln!("DATABASE_URL not set; skipping integration test");
        return Ok(());
    }

    let pool = sqlx::PgPool::connect(&db_url).await?;
    migrations::ensure_schema(&pool).await?;
    sqlx::query("TRUNCATE transaction_logs, friendships, referrals, users RESTART IDENTITY CASCADE").execute(&pool)
                                                                                                    .await?;

    let cache = UserCache::connect(pool.clone(), 3).await?;
    let projector = StoreProjector::new(pool.clone());

    // --- Escenario: registro y amistad en un mismo lote -------------------
    let events = vec![ev(r#"{"type":"register","name":"alice","created_at":"2024-01-01T12:00:00.000Z"}"#),
                      ev(r#"{"type":"register","name":"bob","created_at":"2024-01-01T12:00:01.000Z"}"#),
                      ev(r#"{"type":"addfriend","user1_name":"alice","user2_name":"bob","created_at":"2024-01-01T12:00:02.000Z"}"#)];
    project(&cache, &projector, events).await?;

    let alice = user_id(&pool, "alice").await;
    let bob = user_id(&pool, "bob").await;
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM users").await, 2);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM transaction_logs").await, 3);
    let (u1, u2, status): (i64, i64, String) =
        sqlx::query_as("SELECT user1_id, user2_id, status FROM friendships").fetch_one(&pool).await?;
    assert_eq!((u1, u2), (alice.min(bob), alice.max(bob)));
    assert!(u1 < u2);
    assert_eq!(status, "ACTIVE");

    // --- Escenario: el referido arranca usuarios que nunca se registraron -
    project(&cache, &projector, vec![ev(r#"{"type":"referral","referredBy":"alice","user":"carol"}"#)]).await?;
    let carol = user_id(&pool, "carol").await;
    let (referrer, referred): (i64, i64) =
        sqlx::query_as("SELECT referrer_id, referred_id FROM referrals").fetch_one(&pool).await?;
    assert_eq!((referrer, referred), (alice, carol));
    let (log_user,): (Option<i64>,) =
        sqlx::query_as("SELECT user_id FROM transaction_logs WHERE transaction_type = 'referral'").fetch_one(&pool)
                                                                                                  .await?;
    assert_eq!(log_user, Some(carol));

    // --- Escenario: amistad alternada dentro de un lote (gana la última) --
    let toggles = vec![ev(r#"{"type":"addfriend","user1_name":"dan","user2_name":"eva"}"#),
                       ev(r#"{"type":"unfriend","user1_name":"dan","user2_name":"eva"}"#),
                       ev(r#"{"type":"addfriend","user1_name":"dan","user2_name":"eva"}"#)];
    project(&cache, &projector, toggles).await?;
    let dan = user_id(&pool, "dan").await;
    let eva = user_id(&pool, "eva").await;
    let (status,): (String,) =
        sqlx::query_as("SELECT status FROM friendships WHERE user1_id = $1 AND user2_id = $2").bind(dan.min(eva))
                                                                                              .bind(dan.max(eva))
                                                                                              .fetch_one(&pool)
                                                                                              .await?;
    assert_eq!(status, "ACTIVE");
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM transaction_logs WHERE transaction_type IN ('addfriend','unfriend')").await,
               4); // 1 del primer escenario + 3 de éste

    // Alta y baja en el mismo lote: la fila queda INACTIVE.
    let add_then_drop = vec![ev(r#"{"type":"addfriend","user1_name":"fay","user2_name":"gus"}"#),
                             ev(r#"{"type":"unfriend","user1_name":"fay","user2_name":"gus"}"#)];
    project(&cache, &projector, add_then_drop).await?;
    let fay = user_id(&pool, "fay").await;
    let gus = user_id(&pool, "gus").await;
    let (status,): (String,) =
        sqlx::query_as("SELECT status FROM friendships WHERE user1_id = $1 AND user2_id = $2").bind(fay.min(gus))
                                                                                              .bind(fay.max(gus))
                                                                                              .fetch_one(&pool)
                                                                                              .await?;
    assert_eq!(status, "INACTIVE");

    // Una baja sin alta previa no crea fila.
    project(&cache, &projector, vec![ev(r#"{"type":"unfriend","user1_name":"hal","user2_name":"ivy"}"#)]).await?;
    let hal = user_id(&pool, "hal").await;
    let ivy = user_id(&pool, "ivy").await;
    let missing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM friendships WHERE user1_id = $1 AND user2_id = $2").bind(hal.min(ivy))
                                                                                          .bind(hal.max(ivy))
                                                                                          .fetch_optional(&pool)
                                                                                          .await?;
    assert!(missing.is_none());

    // --- Escenario: referido duplicado entre lotes ------------------------
    project(&cache, &projector, vec![ev(r#"{"type":"referral","referredBy":"alice","user":"carol"}"#)]).await?;
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM referrals").await, 1);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM transaction_logs WHERE transaction_type = 'referral'").await, 2);

    // --- Idempotencia: re-proyectar el mismo lote no cambia el estado -----
    let replay = vec![ev(r#"{"type":"register","name":"alice"}"#),
                      ev(r#"{"type":"addfriend","user1_name":"alice","user2_name":"bob"}"#),
                      ev(r#"{"type":"referral","referredBy":"alice","user":"carol"}"#)];
    let users_before = count(projector.pool(), "SELECT COUNT(*) FROM users").await;
    let friends_before = count(projector.pool(), "SELECT COUNT(*) FROM friendships").await;
    let referrals_before = count(projector.pool(), "SELECT COUNT(*) FROM referrals").await;
    let logs_before = count(projector.pool(), "SELECT COUNT(*) FROM transaction_logs").await;
    project(&cache, &projector, replay.clone()).await?;
    project(&cache, &projector, replay).await?;
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM users").await, users_before);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM friendships").await, friends_before);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM referrals").await, referrals_before);
    // El log nunca se deduplica: crece exactamente en los eventos re-aplicados.
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM transaction_logs").await, logs_before + 6);

    // --- Bordes: nombre en la longitud máxima y lote vacío ----------------
    let long_name = "n".repeat(255);
    project(&cache, &projector, vec![ev(&format!(r#"{{"type":"register","name":"{long_name}"}}"#))]).await?;
    assert!(user_id(&pool, &long_name).await > 0);
    project(&cache, &projector, vec![]).await?; // no-op

    // --- Caché: una fila insertada por fuera se resuelve sin INSERT -------
    let (dave_id,): (i64,) =
        sqlx::query_as("INSERT INTO users (name) VALUES ('dave') RETURNING id").fetch_one(&pool).await?;
    // Equivalente observable a la expiración del TTL: refresco forzado.
    cache.refresh().await?;
    // El snapshot refrescado debe reflejar la tabla completa, fila externa
    // incluida.
    assert_eq!(cache.len().await as i64, count(&pool, "SELECT COUNT(*) FROM users").await);
    let mut names = BTreeSet::new();
    names.insert("dave".to_string());
    let ids = cache.ensure_users_exist(&names).await?;
    assert_eq!(ids.get("dave"), Some(&dave_id));
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM users WHERE name = 'dave'").await, 1);

    // --- Single-flight: demandas concurrentes del mismo nombre nuevo ------
    let cache = Arc::new(cache);
    let mut fresh = BTreeSet::new();
    fresh.insert("walt".to_string());
    let (a, b) = tokio::join!(
        {
            let cache = Arc::clone(&cache);
            let names = fresh.clone();
            async move { cache.ensure_users_exist(&names).await }
        },
        {
            let cache = Arc::clone(&cache);
            let names = fresh.clone();
            async move { cache.ensure_users_exist(&names).await }
        }
    );
    let (a, b) = (a?, b?);
    assert_eq!(a.get("walt"), b.get("walt"));
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM users WHERE name = 'walt'").await, 1);

    Ok(())
}

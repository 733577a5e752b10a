//! Cálculo de backoff exponencial con jitter para los reintentos ante
//! deadlock (caché de usuarios y transacción de proyección).

use rand::Rng;
use std::time::Duration;

/// Base del backoff exponencial.
pub const BACKOFF_BASE_MS: u64 = 100;
/// Magnitud máxima (exclusiva) del jitter aleatorio agregado a cada espera.
pub const BACKOFF_JITTER_MS: u64 = 100;

/// Espera para el intento `attempt` (0-indexado):
/// `100ms * 2^attempt + jitter[0, 100ms)`.
pub fn backoff_with_jitter(attempt: u32) -> Duration {
    // El exponente se acota para que un contador mal alimentado no desborde.
    let base = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(10));
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    Duration::from_millis(base + jitter)
}

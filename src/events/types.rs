//! Tipos de evento del grafo social.
//!
//! Rol en el flujo:
//! - Cada payload de la cola se decodifica a una variante de `Event`.
//! - El enum es un tipo suma cerrado: el planificador hace pattern-matching
//!   exhaustivo, sin jerarquías abiertas.
//! - El discriminador va en el campo `type` del JSON (contrato de wire
//!   estable con el productor).
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutación individual del grafo social extraída de la cola.
///
/// `created_at` viene del productor pero no se usa para ordenar ni se
/// persiste: los timestamps almacenados son el reloj del commit. Por eso su
/// ausencia no invalida el payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    /// Alta explícita de un usuario.
    Register {
        name: String,
        created_at: Option<DateTime<Utc>>,
    },
    /// `referred_by` refirió a `user` (arista dirigida).
    Referral {
        #[serde(rename = "referredBy")]
        referred_by: String,
        user: String,
        created_at: Option<DateTime<Utc>>,
    },
    /// Alta (o reactivación) de amistad entre dos usuarios.
    AddFriend {
        user1_name: String,
        user2_name: String,
        created_at: Option<DateTime<Utc>>,
    },
    /// Baja lógica de la amistad (la fila nunca se borra).
    Unfriend {
        user1_name: String,
        user2_name: String,
        created_at: Option<DateTime<Utc>>,
    },
}

impl Event {
    /// Etiqueta estable de la variante, usada como `transaction_type` en el
    /// log de transacciones.
    pub fn transaction_type(&self) -> &'static str {
        match self {
            Event::Register { .. } => "register",
            Event::Referral { .. } => "referral",
            Event::AddFriend { .. } => "addfriend",
            Event::Unfriend { .. } => "unfriend",
        }
    }

    /// Usuario "sujeto" del evento para el log: el registrado, el referido, o
    /// `user1` en amistades/desamistades.
    pub fn subject(&self) -> &str {
        match self {
            Event::Register { name, .. } => name,
            Event::Referral { user, .. } => user,
            Event::AddFriend { user1_name, .. } => user1_name,
            Event::Unfriend { user1_name, .. } => user1_name,
        }
    }

    /// Nombres de usuario referenciados por el evento.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Event::Register { name, .. } => vec![name],
            Event::Referral { referred_by, user, .. } => vec![referred_by, user],
            Event::AddFriend { user1_name, user2_name, .. } | Event::Unfriend { user1_name, user2_name, .. } => {
                vec![user1_name, user2_name]
            }
        }
    }
}

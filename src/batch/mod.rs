//! Planificador de lotes.
//!
//! Convierte un lote heterogéneo de eventos en un `BatchPlan`: nombres
//! referenciados, aristas de referidos, pares de amistad/desamistad y
//! registros para el log de transacciones. Luego `resolve` traduce nombres a
//! ids y canonicaliza cada par como `(min(id), max(id))`, la forma sobre la
//! que descansa la restricción única de `friendships`.
//!
//! Coalescing intra-lote: ambas operaciones de amistad apuntan a la misma
//! fila, así que gana la última en orden de entrada. El plan reduce cada par
//! a su estado terminal:
//! - el par recibe upsert ACTIVO si el lote contiene al menos un alta;
//! - el par recibe update a INACTIVO si su última operación es una baja.
//! Con el proyector aplicando upserts antes de updates, el estado final
//! coincide con la aplicación secuencial evento por evento, y además ningún
//! statement multi-fila toca dos veces la misma fila. El log conserva una
//! entrada por evento, coalescing aparte.
use std::collections::{BTreeSet, HashMap, HashSet};

use log::debug;
use serde_json::Value;

use crate::errors::WorkerError;
use crate::events::Event;

/// Registro pendiente para `transaction_logs`.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Nombre del usuario sujeto del evento.
    pub subject: String,
    /// Etiqueta de la variante (`register`, `referral`, ...).
    pub kind: &'static str,
    /// Evento completo re-serializado (columna JSONB opaca).
    pub data: Value,
}

/// Representación agrupada de un lote, previa a la resolución de ids.
#[derive(Debug, Default)]
pub struct BatchPlan {
    /// Todo nombre referenciado por algún evento del lote (orden
    /// lexicográfico determinista para la fase de creación de usuarios).
    pub new_users: BTreeSet<String>,
    /// Aristas de referido `(referente, referido)`, primera aparición por par
    /// dirigido.
    pub referrals: Vec<(String, String)>,
    /// Pares (no ordenados) con al menos un alta de amistad en el lote.
    pub friendships: Vec<(String, String)>,
    /// Pares cuya última operación del lote es una baja.
    pub unfriendships: Vec<(String, String)>,
    /// Un registro por evento decodificado, en orden de entrada.
    pub logs: Vec<LogRecord>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

/// Clave de par no ordenado: los nombres se ordenan lexicográficamente sólo
/// para identificar el par; la canonicalización persistida es por id.
fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

struct PairState {
    has_add: bool,
    last_is_unfriend: bool,
}

/// Construye el `BatchPlan` en una sola pasada sobre los eventos.
pub fn plan(events: &[Event]) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut seen_referrals: HashSet<(String, String)> = HashSet::new();
    let mut pair_order: Vec<(String, String)> = Vec::new();
    let mut pair_states: HashMap<(String, String), PairState> = HashMap::new();

    for event in events {
        let data = serde_json::to_value(event).unwrap_or(Value::Null);
        plan.logs.push(LogRecord { subject: event.subject().to_string(),
                                   kind: event.transaction_type(),
                                   data });
        for name in event.names() {
            plan.new_users.insert(name.to_string());
        }
        match event {
            Event::Register { .. } => {}
            Event::Referral { referred_by, user, .. } => {
                let edge = (referred_by.clone(), user.clone());
                if seen_referrals.insert(edge.clone()) {
                    plan.referrals.push(edge);
                }
            }
            Event::AddFriend { user1_name, user2_name, .. } | Event::Unfriend { user1_name, user2_name, .. } => {
                if user1_name == user2_name {
                    // Un par consigo mismo no puede satisfacer user1 < user2;
                    // se conserva el log pero no se genera operación de fila.
                    debug!("ignoring self-pair friendship op for '{user1_name}'");
                    continue;
                }
                let key = pair_key(user1_name, user2_name);
                let state = pair_states.entry(key.clone()).or_insert_with(|| {
                                                              pair_order.push(key);
                                                              PairState { has_add: false, last_is_unfriend: false }
                                                          });
                match event {
                    Event::AddFriend { .. } => {
                        state.has_add = true;
                        state.last_is_unfriend = false;
                    }
                    _ => state.last_is_unfriend = true,
                }
            }
        }
    }

    for key in pair_order {
        let state = &pair_states[&key];
        if state.has_add {
            plan.friendships.push(key.clone());
        }
        if state.last_is_unfriend {
            plan.unfriendships.push(key);
        }
    }
    plan
}

/// Registro de log con el sujeto ya resuelto a id.
#[derive(Debug, Clone)]
pub struct ResolvedLog {
    pub user_id: i64,
    pub kind: &'static str,
    pub data: Value,
}

/// Plan con nombres resueltos a ids y pares canonicalizados, listo para el
/// proyector.
#[derive(Debug, Default)]
pub struct ResolvedBatch {
    pub referrals: Vec<(i64, i64)>,
    pub friend_upserts: Vec<(i64, i64)>,
    pub unfriend_updates: Vec<(i64, i64)>,
    pub logs: Vec<ResolvedLog>,
}

impl ResolvedBatch {
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.referrals.is_empty() && self.friend_upserts.is_empty() && self.unfriend_updates.is_empty()
    }
}

/// Traduce el plan a ids. Todo nombre debe estar en `ids` (garantizado por
/// `ensure_users_exist`); un faltante es un error duro del lote.
pub fn resolve(plan: BatchPlan, ids: &HashMap<String, i64>) -> Result<ResolvedBatch, WorkerError> {
    let id_of = |name: &str| -> Result<i64, WorkerError> {
        ids.get(name).copied().ok_or_else(|| WorkerError::UnresolvedName(name.to_string()))
    };
    let canonical = |a: &str, b: &str| -> Result<(i64, i64), WorkerError> {
        let (ida, idb) = (id_of(a)?, id_of(b)?);
        Ok((ida.min(idb), ida.max(idb)))
    };

    let mut resolved = ResolvedBatch::default();
    for (referrer, referred) in &plan.referrals {
        resolved.referrals.push((id_of(referrer)?, id_of(referred)?));
    }
    for (a, b) in &plan.friendships {
        resolved.friend_upserts.push(canonical(a, b)?);
    }
    for (a, b) in &plan.unfriendships {
        resolved.unfriend_updates.push(canonical(a, b)?);
    }
    for record in plan.logs {
        resolved.logs.push(ResolvedLog { user_id: id_of(&record.subject)?,
                                         kind: record.kind,
                                         data: record.data });
    }
    Ok(resolved)
}

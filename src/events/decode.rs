//! Decodificador de payloads de la cola.
//!
//! Es puro y sin estado: un payload malformado (JSON inválido, variante
//! desconocida, nombre vacío o fuera de rango) produce `DecodeError` y se
//! descarta con un warning; jamás tumba el lote completo.
use log::warn;

use crate::errors::DecodeError;
use crate::events::Event;

/// Longitud máxima de un nombre de usuario (coincide con el VARCHAR(255) del
/// esquema).
pub const MAX_NAME_LEN: usize = 255;

fn check_name(name: &str) -> Result<(), DecodeError> {
    if name.is_empty() {
        return Err(DecodeError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DecodeError::NameTooLong(name.len()));
    }
    Ok(())
}

/// Decodifica un payload individual a su variante de `Event`.
pub fn decode(payload: &str) -> Result<Event, DecodeError> {
    let event: Event = serde_json::from_str(payload)?;
    for name in event.names() {
        check_name(name)?;
    }
    Ok(event)
}

/// Decodifica un lote completo descartando entradas malformadas.
/// Devuelve los eventos válidos en el orden de extracción.
pub fn decode_batch(raw: &[String]) -> Vec<Event> {
    let mut events = Vec::with_capacity(raw.len());
    for payload in raw {
        match decode(payload) {
            Ok(event) => events.push(event),
            Err(e) => warn!("dropping malformed payload: {e} (payload={payload})"),
        }
    }
    events
}

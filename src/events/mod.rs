//! Eventos de mutación del grafo social y su decodificación desde la cola.
mod decode;
mod types;

pub use decode::{decode, decode_batch, MAX_NAME_LEN};
pub use types::Event;

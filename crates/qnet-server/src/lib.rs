// qnet-server — connect handshake, connection arena, and per-tick
// entity-state emission for the authoritative side of a session.

pub mod server;
pub mod sv_ents;
pub mod sv_main;

pub use server::{SlotArena, SlotHandle};
pub use sv_ents::ServerEntity;
pub use sv_main::{Server, ServerConfig, ServerEvent, DEFAULT_PORT};

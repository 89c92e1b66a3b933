// qnet-client — connect handshake, server message parsing, and entity
// interpolation for the viewing side of a session.

pub mod cl_ents;
pub mod cl_main;
pub mod cl_parse;
pub mod client;

pub use cl_ents::{lerp_point, relink_entities};
pub use cl_main::Client;
pub use client::{ClientEntity, ClientEvent, ClientState, SyncType};

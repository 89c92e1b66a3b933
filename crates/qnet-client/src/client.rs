// client.rs — client-side session state.

use qnet_common::entity::{EntityState, Vec3};

/// How an entity's automatic animation is phased when its model changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncType {
    /// All instances animate in lockstep.
    #[default]
    Sync,
    /// Each instance gets a random phase offset (torches, flames).
    Rand,
}

/// One entity as the client tracks it: the last two server samples plus the
/// interpolated render state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientEntity {
    pub baseline: EntityState,
    /// Most recent state off the wire.
    pub state: EntityState,
    /// [0] is the newest sample, [1] the one before it.
    pub msg_origins: [Vec3; 2],
    pub msg_angles: [Vec3; 2],
    /// Server timestamp of the newest sample.
    pub msg_time: f64,
    /// Interpolated render position.
    pub origin: Vec3,
    pub angles: Vec3,
    /// Animation phase offset for random-sync models.
    pub sync_base: f32,
    /// Snap to the newest sample instead of interpolating this frame.
    pub force_link: bool,
}

/// Everything the parser and interpolator share. Owned by the session loop;
/// entity storage grows on demand as higher entity numbers appear.
#[derive(Debug, Default)]
pub struct ClientState {
    /// Render time, nudged by the interpolator to stay inside the sample
    /// window.
    pub time: f64,
    /// Server timestamps of the last two snapshots; [0] is the newest.
    pub mtime: [f64; 2],
    /// Signon stage reached during the post-accept handshake.
    pub signon: u8,
    /// Entities 1..=max_players are player slots.
    pub max_players: u8,
    pub entities: Vec<ClientEntity>,
    /// Animation sync policy per model index.
    pub model_sync: Vec<SyncType>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot for `number`, growing the table as needed. The wire codec
    /// has already bounds-checked the number against MAX_EDICTS.
    pub fn entity_mut(&mut self, number: u16) -> &mut ClientEntity {
        let idx = number as usize;
        if idx >= self.entities.len() {
            self.entities.resize_with(idx + 1, ClientEntity::default);
        }
        &mut self.entities[idx]
    }
}

/// What a pump delivered to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The handshake completed; session traffic may flow.
    Connected,
    /// The server closed the session.
    ServerDisconnected,
    Print(String),
    /// Signon stage advance from the server.
    SignonStage(u8),
    /// One entity update record, with the resolved post-delta state.
    Update {
        number: u16,
        bits: u16,
        state: EntityState,
    },
    /// A player entity changed colors; the renderer must rebuild its skin
    /// translation.
    PlayerSkinChanged(u16),
}

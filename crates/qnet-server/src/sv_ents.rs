// sv_ents.rs — entity state emission.
//
// Baselines are captured once at level spawn and sent to each client over
// the reliable channel during signon; after that every tick's snapshot is a
// self-contained unreliable datagram of baseline-relative update records.

use qnet_common::entity::{write_baseline, write_update, EntityState};
use qnet_common::msg::MsgWriter;
use qnet_common::svc::ServerOp;

/// One entity as the game layer hands it to the network core for a tick.
#[derive(Debug, Clone, Copy)]
pub struct ServerEntity {
    pub number: u16,
    pub state: EntityState,
    /// Step-wise movement (stairs, lifts): tells the client not to
    /// interpolate this update.
    pub step_movement: bool,
}

/// Record the spawn-time state of every entity as its baseline, densely
/// indexed by entity number. Superseded wholesale on level change.
pub fn capture_baselines(entities: &[ServerEntity]) -> Vec<EntityState> {
    let max = entities.iter().map(|e| e.number as usize).max().unwrap_or(0);
    let mut baselines = vec![EntityState::default(); max + 1];
    for ent in entities {
        baselines[ent.number as usize] = ent.state;
    }
    baselines
}

/// Build the signon message: one spawn-baseline record per entity, then the
/// signon stage advance. Sent once over the reliable channel.
pub fn build_signon(baselines: &[EntityState], stage: u8) -> Vec<u8> {
    let mut msg = MsgWriter::new();
    for (number, baseline) in baselines.iter().enumerate().skip(1) {
        if baseline.model_index == 0 {
            continue;
        }
        msg.write_byte(ServerOp::SpawnBaseline as u8);
        write_baseline(&mut msg, number as u16, baseline);
    }
    msg.write_byte(ServerOp::SignonNum as u8);
    msg.write_byte(stage);
    msg.into_vec()
}

/// Build one tick's snapshot: the server timestamp followed by an update
/// record for every visible entity. Entities outside `baselines` delta
/// against the zero state.
pub fn build_snapshot(
    server_time: f32,
    baselines: &[EntityState],
    entities: &[ServerEntity],
) -> Vec<u8> {
    let zero = EntityState::default();
    let mut msg = MsgWriter::new();
    msg.write_byte(ServerOp::Time as u8);
    msg.write_float(server_time);
    for ent in entities {
        let baseline = baselines.get(ent.number as usize).unwrap_or(&zero);
        write_update(&mut msg, ent.number, baseline, &ent.state, ent.step_movement);
    }
    msg.into_vec()
}

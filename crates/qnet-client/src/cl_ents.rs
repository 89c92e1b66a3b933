// cl_ents.rs — entity update parsing and frame interpolation.
//
// Each snapshot leaves two position samples per entity; the renderer sees a
// position interpolated between them at the current render time. Entities
// that missed a snapshot, changed to a null model, or carry the no-lerp bit
// snap to their newest sample instead.

use rand::Rng;

use qnet_common::entity::{
    read_entity_number, read_update, read_update_bits, U_NOLERP,
};
use qnet_common::msg::MsgReader;
use qnet_common::NetError;

use crate::client::{ClientEvent, ClientState, SyncType};

/// A sample-to-sample jump beyond this distance on any axis is a teleport;
/// interpolating across it would sweep the entity through the level.
const TELEPORT_DISTANCE: f32 = 100.0;

/// Parse one entity update record whose leading (signal) byte has already
/// been consumed.
pub fn parse_update(
    cl: &mut ClientState,
    r: &mut MsgReader,
    first_byte: u8,
    events: &mut Vec<ClientEvent>,
) -> Result<(), NetError> {
    let bits = read_update_bits(r, first_byte)?;
    let number = read_entity_number(r, bits)?;

    let mtime = cl.mtime;
    let max_players = cl.max_players as u16;
    let baseline = cl.entity_mut(number).baseline;
    let new = read_update(r, bits, &baseline)?;

    // phase offset for the entity's new model, decided by its sync policy
    let sync_base = match cl.model_sync.get(new.model_index as usize) {
        Some(SyncType::Rand) => rand::thread_rng().gen::<f32>(),
        _ => 0.0,
    };

    let ent = cl.entity_mut(number);

    // no sample from the previous snapshot to interpolate from
    let mut force_link = ent.msg_time != mtime[1];
    ent.msg_time = mtime[0];

    if new.model_index != ent.state.model_index {
        if new.model_index == 0 {
            // the slot was vacated and respawned as something else
            force_link = true;
        } else {
            ent.sync_base = sync_base;
        }
        // a player slot's skin translation is tied to its model
        if number >= 1 && number <= max_players {
            events.push(ClientEvent::PlayerSkinChanged(number));
        }
    }
    if bits & U_NOLERP != 0 {
        force_link = true;
    }

    ent.msg_origins[1] = ent.msg_origins[0];
    ent.msg_origins[0] = new.origin;
    ent.msg_angles[1] = ent.msg_angles[0];
    ent.msg_angles[0] = new.angles;

    if force_link {
        ent.msg_origins[1] = new.origin;
        ent.msg_angles[1] = new.angles;
        ent.origin = new.origin;
        ent.angles = new.angles;
    }

    ent.force_link = force_link;
    ent.state = new;

    events.push(ClientEvent::Update {
        number,
        bits,
        state: new,
    });
    Ok(())
}

/// Where the render time falls between the last two snapshots, in [0, 1].
/// Nudges `cl.time` back inside the window when it has drifted past either
/// edge, and caps the snapshot gap at 100ms so a stall does not smear one
/// step across seconds of render time.
pub fn lerp_point(cl: &mut ClientState) -> f32 {
    let mut f = cl.mtime[0] - cl.mtime[1];
    if f == 0.0 {
        cl.time = cl.mtime[0];
        return 1.0;
    }
    if f > 0.1 {
        cl.mtime[1] = cl.mtime[0] - 0.1;
        f = 0.1;
    }

    let frac = (cl.time - cl.mtime[1]) / f;
    if frac < 0.0 {
        if frac < -0.01 {
            cl.time = cl.mtime[1];
        }
        return 0.0;
    }
    if frac > 1.0 {
        if frac > 1.01 {
            cl.time = cl.mtime[0];
        }
        return 1.0;
    }
    frac as f32
}

/// Recompute every entity's render position for the current render time.
/// An entity the newest snapshot did not mention no longer exists on the
/// server; its slot is vacated here rather than by an explicit remove
/// message.
pub fn relink_entities(cl: &mut ClientState) {
    let frac = lerp_point(cl);
    let newest = cl.mtime[0];

    for ent in cl.entities.iter_mut().skip(1) {
        if ent.state.model_index == 0 {
            // empty slot
            continue;
        }
        if ent.msg_time != newest {
            ent.state.model_index = 0;
            continue;
        }

        if ent.force_link {
            ent.origin = ent.msg_origins[0];
            ent.angles = ent.msg_angles[0];
            ent.force_link = false;
            continue;
        }

        let mut f = frac;
        let mut delta = [0.0f32; 3];
        for i in 0..3 {
            delta[i] = ent.msg_origins[0][i] - ent.msg_origins[1][i];
            if delta[i] > TELEPORT_DISTANCE || delta[i] < -TELEPORT_DISTANCE {
                f = 1.0;
            }
        }

        for i in 0..3 {
            ent.origin[i] = ent.msg_origins[1][i] + f * delta[i];

            // interpolate angles along the short way around
            let mut d = ent.msg_angles[0][i] - ent.msg_angles[1][i];
            if d > 180.0 {
                d -= 360.0;
            } else if d <= -180.0 {
                d += 360.0;
            }
            ent.angles[i] = ent.msg_angles[1][i] + f * d;
        }
    }
}

// entity.rs — entity state and the baseline/delta wire codec.
//
// Each visible entity is expressed as a bitmask-selected delta against its
// baseline. The bit assignments and the field read order are positional and
// must match exactly between encoder and decoder; a single mismatch
// desynchronizes every subsequent entity in the message.

use crate::error::NetError;
use crate::msg::{MsgReader, MsgWriter};

pub type Vec3 = [f32; 3];

/// Highest entity index encodable with the long-entity bit.
pub const MAX_EDICTS: u16 = 8192;

/// Sub-tolerance motion on an axis is not re-sent.
pub const ORIGIN_EPSILON: f32 = 0.1;

// Update bitmask. First byte:
pub const U_MOREBITS: u16 = 1 << 0;
pub const U_ORIGIN1: u16 = 1 << 1;
pub const U_ORIGIN2: u16 = 1 << 2;
pub const U_ORIGIN3: u16 = 1 << 3;
pub const U_ANGLE2: u16 = 1 << 4;
/// Step-wise mover: the client must snap instead of interpolating.
pub const U_NOLERP: u16 = 1 << 5;
pub const U_FRAME: u16 = 1 << 6;
/// Distinguishes an entity update from other server opcodes.
pub const U_SIGNAL: u16 = 1 << 7;

// Second byte (present when U_MOREBITS is set):
pub const U_ANGLE1: u16 = 1 << 8;
pub const U_ANGLE3: u16 = 1 << 9;
pub const U_MODEL: u16 = 1 << 10;
pub const U_COLORMAP: u16 = 1 << 11;
pub const U_SKIN: u16 = 1 << 12;
pub const U_EFFECTS: u16 = 1 << 13;
pub const U_LONGENTITY: u16 = 1 << 14;

/// The networked state of one entity. Baselines are the same type, recorded
/// once when the entity first becomes visible and immutable for the life of
/// the level.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EntityState {
    pub model_index: u8,
    pub frame: u8,
    pub colormap: u8,
    pub skin: u8,
    pub effects: u8,
    pub origin: Vec3,
    pub angles: Vec3,
}

/// Compute the changed-field bitmask of `state` against `baseline`.
/// Origin uses the 0.1-unit tolerance, angles exact inequality.
pub fn update_bits(baseline: &EntityState, state: &EntityState, step_movement: bool) -> u16 {
    let mut bits = 0u16;

    for i in 0..3 {
        let miss = state.origin[i] - baseline.origin[i];
        if miss < -ORIGIN_EPSILON || miss > ORIGIN_EPSILON {
            bits |= match i {
                0 => U_ORIGIN1,
                1 => U_ORIGIN2,
                _ => U_ORIGIN3,
            };
        }
    }

    if state.angles[0] != baseline.angles[0] {
        bits |= U_ANGLE1;
    }
    if state.angles[1] != baseline.angles[1] {
        bits |= U_ANGLE2;
    }
    if state.angles[2] != baseline.angles[2] {
        bits |= U_ANGLE3;
    }

    if step_movement {
        bits |= U_NOLERP;
    }
    if state.model_index != baseline.model_index {
        bits |= U_MODEL;
    }
    if state.frame != baseline.frame {
        bits |= U_FRAME;
    }
    if state.colormap != baseline.colormap {
        bits |= U_COLORMAP;
    }
    if state.skin != baseline.skin {
        bits |= U_SKIN;
    }
    if state.effects != baseline.effects {
        bits |= U_EFFECTS;
    }

    bits
}

/// Write one entity update record. A record with no changed fields is still
/// written; its presence is what keeps the entity alive on the client.
pub fn write_update(
    msg: &mut MsgWriter,
    number: u16,
    baseline: &EntityState,
    state: &EntityState,
    step_movement: bool,
) {
    debug_assert!(number != 0 && number < MAX_EDICTS, "bad entity number");

    let mut bits = update_bits(baseline, state, step_movement);
    if number > 255 {
        bits |= U_LONGENTITY;
    }
    if bits & 0xff00 != 0 {
        bits |= U_MOREBITS;
    }

    msg.write_byte((bits as u8) | (U_SIGNAL as u8));
    if bits & U_MOREBITS != 0 {
        msg.write_byte((bits >> 8) as u8);
    }

    if bits & U_LONGENTITY != 0 {
        msg.write_short(number as i16);
    } else {
        msg.write_byte(number as u8);
    }

    if bits & U_MODEL != 0 {
        msg.write_byte(state.model_index);
    }
    if bits & U_FRAME != 0 {
        msg.write_byte(state.frame);
    }
    if bits & U_COLORMAP != 0 {
        msg.write_byte(state.colormap);
    }
    if bits & U_SKIN != 0 {
        msg.write_byte(state.skin);
    }
    if bits & U_EFFECTS != 0 {
        msg.write_byte(state.effects);
    }
    if bits & U_ORIGIN1 != 0 {
        msg.write_coord(state.origin[0]);
    }
    if bits & U_ANGLE1 != 0 {
        msg.write_angle(state.angles[0]);
    }
    if bits & U_ORIGIN2 != 0 {
        msg.write_coord(state.origin[1]);
    }
    if bits & U_ANGLE2 != 0 {
        msg.write_angle(state.angles[1]);
    }
    if bits & U_ORIGIN3 != 0 {
        msg.write_coord(state.origin[2]);
    }
    if bits & U_ANGLE3 != 0 {
        msg.write_angle(state.angles[2]);
    }
}

/// Complete the bitmask whose first byte (signal bit stripped) has already
/// been read, handling the continuation byte.
pub fn read_update_bits(r: &mut MsgReader, first_byte: u8) -> Result<u16, NetError> {
    let mut bits = (first_byte & !(U_SIGNAL as u8)) as u16;
    if bits & U_MOREBITS != 0 {
        bits |= (r.read_byte()? as u16) << 8;
    }
    Ok(bits)
}

/// Read the entity index, one or two bytes per the long-entity bit.
pub fn read_entity_number(r: &mut MsgReader, bits: u16) -> Result<u16, NetError> {
    let number = if bits & U_LONGENTITY != 0 {
        r.read_short()? as u16
    } else {
        r.read_byte()? as u16
    };
    if number == 0 || number >= MAX_EDICTS {
        return Err(NetError::BadEntityNumber(number));
    }
    Ok(number)
}

/// Reconstruct a full entity state: fields whose bit is set come off the
/// wire, all others inherit the baseline value.
pub fn read_update(
    r: &mut MsgReader,
    bits: u16,
    baseline: &EntityState,
) -> Result<EntityState, NetError> {
    let mut state = *baseline;

    if bits & U_MODEL != 0 {
        state.model_index = r.read_byte()?;
    }
    if bits & U_FRAME != 0 {
        state.frame = r.read_byte()?;
    }
    if bits & U_COLORMAP != 0 {
        state.colormap = r.read_byte()?;
    }
    if bits & U_SKIN != 0 {
        state.skin = r.read_byte()?;
    }
    if bits & U_EFFECTS != 0 {
        state.effects = r.read_byte()?;
    }
    if bits & U_ORIGIN1 != 0 {
        state.origin[0] = r.read_coord()?;
    }
    if bits & U_ANGLE1 != 0 {
        state.angles[0] = r.read_angle()?;
    }
    if bits & U_ORIGIN2 != 0 {
        state.origin[1] = r.read_coord()?;
    }
    if bits & U_ANGLE2 != 0 {
        state.angles[1] = r.read_angle()?;
    }
    if bits & U_ORIGIN3 != 0 {
        state.origin[2] = r.read_coord()?;
    }
    if bits & U_ANGLE3 != 0 {
        state.angles[2] = r.read_angle()?;
    }

    Ok(state)
}

/// Write a signon baseline record body (entity number plus every field).
pub fn write_baseline(msg: &mut MsgWriter, number: u16, baseline: &EntityState) {
    msg.write_short(number as i16);
    msg.write_byte(baseline.model_index);
    msg.write_byte(baseline.frame);
    msg.write_byte(baseline.colormap);
    msg.write_byte(baseline.skin);
    msg.write_byte(baseline.effects);
    for i in 0..3 {
        msg.write_coord(baseline.origin[i]);
        msg.write_angle(baseline.angles[i]);
    }
}

/// Read a signon baseline record body.
pub fn read_baseline(r: &mut MsgReader) -> Result<(u16, EntityState), NetError> {
    let number = r.read_short()? as u16;
    if number == 0 || number >= MAX_EDICTS {
        return Err(NetError::BadEntityNumber(number));
    }
    let mut baseline = EntityState {
        model_index: r.read_byte()?,
        frame: r.read_byte()?,
        colormap: r.read_byte()?,
        skin: r.read_byte()?,
        effects: r.read_byte()?,
        ..Default::default()
    };
    for i in 0..3 {
        baseline.origin[i] = r.read_coord()?;
        baseline.angles[i] = r.read_angle()?;
    }
    Ok((number, baseline))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline() -> EntityState {
        EntityState {
            model_index: 3,
            frame: 0,
            colormap: 0,
            skin: 1,
            effects: 0,
            origin: [16.0, -32.0, 24.0],
            angles: [0.0, 90.0, 0.0],
        }
    }

    #[test]
    fn unchanged_state_sets_no_field_bits() {
        let b = baseline();
        assert_eq!(update_bits(&b, &b, false), 0);
    }

    #[test]
    fn sub_tolerance_motion_not_resent() {
        let b = baseline();
        let mut s = b;
        s.origin[0] += 0.05;
        assert_eq!(update_bits(&b, &s, false), 0);
        s.origin[0] = b.origin[0] + 0.25;
        assert_eq!(update_bits(&b, &s, false), U_ORIGIN1);
    }

    #[test]
    fn angle_changes_are_exact() {
        let b = baseline();
        let mut s = b;
        s.angles[1] += 0.001;
        assert_eq!(update_bits(&b, &s, false), U_ANGLE2);
    }

    #[test]
    fn step_movement_sets_nolerp() {
        let b = baseline();
        assert_eq!(update_bits(&b, &b, true), U_NOLERP);
    }

    #[test]
    fn short_record_for_unchanged_entity() {
        let b = baseline();
        let mut msg = MsgWriter::new();
        write_update(&mut msg, 7, &b, &b, false);
        // signal byte + entity number, nothing else
        assert_eq!(msg.as_slice(), &[U_SIGNAL as u8, 7]);
    }

    #[test]
    fn long_entity_number_uses_two_bytes() {
        let b = baseline();
        let mut msg = MsgWriter::new();
        write_update(&mut msg, 300, &b, &b, false);

        let mut r = MsgReader::new(msg.as_slice());
        let first = r.read_byte().unwrap();
        assert!(first & U_SIGNAL as u8 != 0);
        let bits = read_update_bits(&mut r, first).unwrap();
        assert!(bits & U_LONGENTITY != 0);
        assert_eq!(read_entity_number(&mut r, bits).unwrap(), 300);
    }

    #[test]
    fn delta_round_trip_subset_of_fields() {
        let b = baseline();
        let state = EntityState {
            model_index: 5,
            frame: 12,
            skin: 1,
            origin: [16.0, 40.0, 24.0],
            angles: [0.0, 45.0, 0.0],
            ..b
        };

        let mut msg = MsgWriter::new();
        write_update(&mut msg, 42, &b, &state, false);

        let mut r = MsgReader::new(msg.as_slice());
        let first = r.read_byte().unwrap();
        let bits = read_update_bits(&mut r, first).unwrap();
        assert_eq!(read_entity_number(&mut r, bits).unwrap(), 42);
        let decoded = read_update(&mut r, bits, &b).unwrap();
        assert!(r.is_empty());

        assert_eq!(decoded, state);
        // unset fields really came from the baseline
        assert_eq!(decoded.skin, b.skin);
        assert_eq!(decoded.origin[0], b.origin[0]);
    }

    #[test]
    fn baseline_record_round_trip() {
        let b = baseline();
        let mut msg = MsgWriter::new();
        write_baseline(&mut msg, 42, &b);
        let mut r = MsgReader::new(msg.as_slice());
        let (number, decoded) = read_baseline(&mut r).unwrap();
        assert_eq!(number, 42);
        assert_eq!(decoded, b);
        assert!(r.is_empty());
    }

    #[test]
    fn out_of_range_entity_numbers_rejected() {
        let mut r = MsgReader::new(&[0]);
        assert!(matches!(
            read_entity_number(&mut r, 0),
            Err(NetError::BadEntityNumber(0))
        ));

        let mut msg = MsgWriter::new();
        msg.write_short(MAX_EDICTS as i16);
        let mut r = MsgReader::new(msg.as_slice());
        assert!(matches!(
            read_entity_number(&mut r, U_LONGENTITY),
            Err(NetError::BadEntityNumber(MAX_EDICTS))
        ));
    }
}

// wire.rs — fixed-layout packet header shared by every packet type.
//
// Two big-endian u32 words on the wire regardless of host endianness:
// the first carries the flag bits OR'd over the payload byte length, the
// second the sequence number. Control packets carry sequence 0.

use bitflags::bitflags;

use crate::error::NetError;

/// Size of the packet header on the wire.
pub const HEADER_SIZE: usize = 8;

/// Largest payload a single physical packet may carry. Reliable messages
/// bigger than this are fragmented.
pub const MAX_DATAGRAM: usize = 1024;

/// Absolute cap on a reassembled reliable message. Exceeding it on the send
/// side is a programming error; on the receive side it is fatal to the
/// connection.
pub const MAX_MESSAGE: usize = 8192;

/// Largest physical packet.
pub const MAX_PACKET: usize = HEADER_SIZE + MAX_DATAGRAM;

/// Low bits of the first header word hold the payload length.
pub const LENGTH_MASK: u32 = 0x0000_ffff;

bitflags! {
    /// Packet class bits, OR'd into the high bits of the length word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u32 {
        /// Reliable-channel fragment.
        const DATA = 0x0001_0000;
        /// Acknowledgement of a reliable fragment.
        const ACK = 0x0002_0000;
        /// Final fragment of a reliable message.
        const EOM = 0x0008_0000;
        /// Unreliable-channel datagram.
        const UNRELIABLE = 0x0010_0000;
        /// Connectionless control packet.
        const CTL = 0x8000_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: PacketFlags,
    pub length: u16,
    pub sequence: u32,
}

impl PacketHeader {
    pub fn new(flags: PacketFlags, length: usize, sequence: u32) -> Self {
        debug_assert!(length <= LENGTH_MASK as usize);
        Self {
            flags,
            length: length as u16,
            sequence,
        }
    }

    /// Append the 8 header bytes to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let word = self.flags.bits() | self.length as u32;
        out.extend_from_slice(&word.to_be_bytes());
        out.extend_from_slice(&self.sequence.to_be_bytes());
    }

    /// Split a physical packet into header and payload, validating the flag
    /// bits and the length-field invariant.
    pub fn decode(packet: &[u8]) -> Result<(PacketHeader, &[u8]), NetError> {
        if packet.len() < HEADER_SIZE {
            return Err(NetError::BadHeader);
        }
        let word = u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]);
        let sequence = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);

        let flags =
            PacketFlags::from_bits(word & !LENGTH_MASK).ok_or(NetError::BadHeader)?;
        let length = (word & LENGTH_MASK) as usize;

        let payload = &packet[HEADER_SIZE..];
        if length != payload.len() {
            return Err(NetError::LengthMismatch);
        }

        Ok((
            PacketHeader {
                flags,
                length: length as u16,
                sequence,
            },
            payload,
        ))
    }
}

/// Build a complete physical packet from a header and payload.
pub fn build_packet(flags: PacketFlags, sequence: u32, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
    PacketHeader::new(flags, payload.len(), sequence).encode(&mut packet);
    packet.extend_from_slice(payload);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let packet = build_packet(PacketFlags::DATA | PacketFlags::EOM, 7, b"hello");
        let (header, payload) = PacketHeader::decode(&packet).unwrap();
        assert_eq!(header.flags, PacketFlags::DATA | PacketFlags::EOM);
        assert_eq!(header.length, 5);
        assert_eq!(header.sequence, 7);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn header_is_big_endian() {
        let packet = build_packet(PacketFlags::ACK, 0x01020304, &[]);
        // flag word: 0x00020000
        assert_eq!(&packet[0..4], &[0x00, 0x02, 0x00, 0x00]);
        assert_eq!(&packet[4..8], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn length_field_must_match_payload() {
        let mut packet = build_packet(PacketFlags::UNRELIABLE, 1, b"abc");
        packet.push(0); // one trailing byte not covered by the length field
        assert!(matches!(
            PacketHeader::decode(&packet),
            Err(NetError::LengthMismatch)
        ));
    }

    #[test]
    fn unknown_flag_bits_rejected() {
        let mut packet = build_packet(PacketFlags::DATA, 1, b"x");
        packet[1] |= 0x40; // poke an undefined flag bit
        assert!(matches!(
            PacketHeader::decode(&packet),
            Err(NetError::BadHeader)
        ));
    }

    #[test]
    fn truncated_header_rejected() {
        assert!(matches!(
            PacketHeader::decode(&[1, 2, 3]),
            Err(NetError::BadHeader)
        ));
    }
}

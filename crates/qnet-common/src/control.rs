// control.rs — connectionless request/reply protocol.
//
// These messages are exchanged before a logical connection exists, on raw
// packets carrying the CTL flag and sequence 0. Every message opens with an
// opcode byte, the game magic string, and a protocol version byte; a peer
// whose magic or version does not match is rejected.

use crate::error::NetError;
use crate::msg::{MsgReader, MsgWriter};
use crate::wire::{build_packet, PacketFlags, PacketHeader};

/// Magic literal identifying the game protocol family.
pub const GAME_MAGIC: &str = "QUAKE";

/// Control/game protocol version byte.
pub const PROTOCOL_VERSION: u8 = 15;

// Request opcodes
pub const CCREQ_CONNECT: u8 = 0x01;
pub const CCREQ_SERVER_INFO: u8 = 0x02;
pub const CCREQ_PLAYER_INFO: u8 = 0x03;
pub const CCREQ_RULE_INFO: u8 = 0x04;

// Reply opcodes
pub const CCREP_ACCEPT: u8 = 0x81;
pub const CCREP_REJECT: u8 = 0x82;
pub const CCREP_SERVER_INFO: u8 = 0x83;
pub const CCREP_PLAYER_INFO: u8 = 0x84;
pub const CCREP_RULE_INFO: u8 = 0x85;

/// Closed enumeration of every connectionless message. Unknown opcodes fail
/// decoding; the caller drops such packets silently.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    ConnectRequest,
    ServerInfoRequest,
    PlayerInfoRequest {
        player: u8,
    },
    /// Cursor-style pagination: echoes the previously returned rule name,
    /// empty for the first rule.
    RuleInfoRequest {
        prev_rule: String,
    },
    /// The ephemeral port the client must redirect all session traffic to.
    Accept {
        port: u16,
    },
    Reject {
        reason: String,
    },
    ServerInfoReply {
        address: String,
        hostname: String,
        level_name: String,
        current_players: u8,
        max_players: u8,
        version: u8,
    },
    PlayerInfoReply {
        player: u8,
        name: String,
        colors: i32,
        frags: i32,
        connect_seconds: i32,
        address: String,
    },
    /// An empty rule name means the cursor is exhausted.
    RuleInfoReply {
        rule: String,
        value: String,
    },
}

impl ControlMessage {
    pub fn opcode(&self) -> u8 {
        match self {
            ControlMessage::ConnectRequest => CCREQ_CONNECT,
            ControlMessage::ServerInfoRequest => CCREQ_SERVER_INFO,
            ControlMessage::PlayerInfoRequest { .. } => CCREQ_PLAYER_INFO,
            ControlMessage::RuleInfoRequest { .. } => CCREQ_RULE_INFO,
            ControlMessage::Accept { .. } => CCREP_ACCEPT,
            ControlMessage::Reject { .. } => CCREP_REJECT,
            ControlMessage::ServerInfoReply { .. } => CCREP_SERVER_INFO,
            ControlMessage::PlayerInfoReply { .. } => CCREP_PLAYER_INFO,
            ControlMessage::RuleInfoReply { .. } => CCREP_RULE_INFO,
        }
    }

    /// Encode into a complete physical packet (CTL header + payload).
    pub fn encode_packet(&self) -> Vec<u8> {
        let mut w = MsgWriter::new();
        w.write_byte(self.opcode());
        w.write_string(GAME_MAGIC);
        w.write_byte(PROTOCOL_VERSION);

        match self {
            ControlMessage::ConnectRequest | ControlMessage::ServerInfoRequest => {}
            ControlMessage::PlayerInfoRequest { player } => {
                w.write_byte(*player);
            }
            ControlMessage::RuleInfoRequest { prev_rule } => {
                w.write_string(prev_rule);
            }
            ControlMessage::Accept { port } => {
                w.write_long(*port as i32);
            }
            ControlMessage::Reject { reason } => {
                w.write_string(reason);
            }
            ControlMessage::ServerInfoReply {
                address,
                hostname,
                level_name,
                current_players,
                max_players,
                version,
            } => {
                w.write_string(address);
                w.write_string(hostname);
                w.write_string(level_name);
                w.write_byte(*current_players);
                w.write_byte(*max_players);
                w.write_byte(*version);
            }
            ControlMessage::PlayerInfoReply {
                player,
                name,
                colors,
                frags,
                connect_seconds,
                address,
            } => {
                w.write_byte(*player);
                w.write_string(name);
                w.write_long(*colors);
                w.write_long(*frags);
                w.write_long(*connect_seconds);
                w.write_string(address);
            }
            ControlMessage::RuleInfoReply { rule, value } => {
                w.write_string(rule);
                w.write_string(value);
            }
        }

        build_packet(PacketFlags::CTL, 0, w.as_slice())
    }

    /// Decode a complete physical packet. The packet must carry exactly the
    /// CTL flag; magic and version are validated for every message kind.
    pub fn decode_packet(packet: &[u8]) -> Result<ControlMessage, NetError> {
        let (header, payload) = PacketHeader::decode(packet)?;
        if header.flags != PacketFlags::CTL {
            return Err(NetError::BadHeader);
        }

        let mut r = MsgReader::new(payload);
        let opcode = r.read_byte()?;
        if r.read_string()? != GAME_MAGIC {
            return Err(NetError::BadMagic);
        }
        let version = r.read_byte()?;
        if version != PROTOCOL_VERSION {
            return Err(NetError::BadVersion(version));
        }

        let msg = match opcode {
            CCREQ_CONNECT => ControlMessage::ConnectRequest,
            CCREQ_SERVER_INFO => ControlMessage::ServerInfoRequest,
            CCREQ_PLAYER_INFO => ControlMessage::PlayerInfoRequest {
                player: r.read_byte()?,
            },
            CCREQ_RULE_INFO => ControlMessage::RuleInfoRequest {
                prev_rule: r.read_string()?,
            },
            CCREP_ACCEPT => ControlMessage::Accept {
                port: r.read_long()? as u16,
            },
            CCREP_REJECT => ControlMessage::Reject {
                reason: r.read_string()?,
            },
            CCREP_SERVER_INFO => ControlMessage::ServerInfoReply {
                address: r.read_string()?,
                hostname: r.read_string()?,
                level_name: r.read_string()?,
                current_players: r.read_byte()?,
                max_players: r.read_byte()?,
                version: r.read_byte()?,
            },
            CCREP_PLAYER_INFO => ControlMessage::PlayerInfoReply {
                player: r.read_byte()?,
                name: r.read_string()?,
                colors: r.read_long()?,
                frags: r.read_long()?,
                connect_seconds: r.read_long()?,
                address: r.read_string()?,
            },
            CCREP_RULE_INFO => ControlMessage::RuleInfoReply {
                rule: r.read_string()?,
                value: r.read_string()?,
            },
            other => return Err(NetError::UnknownOpcode(other)),
        };

        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: ControlMessage) {
        let packet = msg.encode_packet();
        assert_eq!(ControlMessage::decode_packet(&packet).unwrap(), msg);
    }

    #[test]
    fn connect_request_round_trip() {
        round_trip(ControlMessage::ConnectRequest);
    }

    #[test]
    fn accept_round_trip() {
        round_trip(ControlMessage::Accept { port: 51234 });
    }

    #[test]
    fn reject_round_trip() {
        round_trip(ControlMessage::Reject {
            reason: "Server is full.".into(),
        });
    }

    #[test]
    fn server_info_reply_round_trip() {
        round_trip(ControlMessage::ServerInfoReply {
            address: "192.168.1.5:26000".into(),
            hostname: "local".into(),
            level_name: "start".into(),
            current_players: 3,
            max_players: 8,
            version: PROTOCOL_VERSION,
        });
    }

    #[test]
    fn player_info_reply_round_trip() {
        round_trip(ControlMessage::PlayerInfoReply {
            player: 2,
            name: "player".into(),
            colors: 0x44,
            frags: -3,
            connect_seconds: 120,
            address: "10.0.0.9:5000".into(),
        });
    }

    #[test]
    fn rule_info_pagination_round_trip() {
        round_trip(ControlMessage::RuleInfoRequest {
            prev_rule: "deathmatch".into(),
        });
        round_trip(ControlMessage::RuleInfoReply {
            rule: "".into(),
            value: "".into(),
        });
    }

    #[test]
    fn bad_magic_rejected() {
        let mut w = MsgWriter::new();
        w.write_byte(CCREQ_CONNECT);
        w.write_string("DOOM");
        w.write_byte(PROTOCOL_VERSION);
        let packet = build_packet(PacketFlags::CTL, 0, w.as_slice());
        assert!(matches!(
            ControlMessage::decode_packet(&packet),
            Err(NetError::BadMagic)
        ));
    }

    #[test]
    fn bad_version_rejected() {
        let mut w = MsgWriter::new();
        w.write_byte(CCREQ_CONNECT);
        w.write_string(GAME_MAGIC);
        w.write_byte(PROTOCOL_VERSION + 1);
        let packet = build_packet(PacketFlags::CTL, 0, w.as_slice());
        assert!(matches!(
            ControlMessage::decode_packet(&packet),
            Err(NetError::BadVersion(_))
        ));
    }

    #[test]
    fn unknown_opcode_rejected() {
        let mut w = MsgWriter::new();
        w.write_byte(0x7f);
        w.write_string(GAME_MAGIC);
        w.write_byte(PROTOCOL_VERSION);
        let packet = build_packet(PacketFlags::CTL, 0, w.as_slice());
        assert!(matches!(
            ControlMessage::decode_packet(&packet),
            Err(NetError::UnknownOpcode(0x7f))
        ));
    }

    #[test]
    fn non_ctl_packet_rejected() {
        let packet = build_packet(PacketFlags::DATA, 0, &[CCREQ_CONNECT]);
        assert!(matches!(
            ControlMessage::decode_packet(&packet),
            Err(NetError::BadHeader)
        ));
    }
}

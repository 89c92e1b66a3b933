// svc.rs — server-to-client message opcodes.
//
// Entity update records are not listed here: they are flagged by the high
// (signal) bit of their leading byte, which no opcode below sets.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerOp {
    Nop = 1,
    Disconnect = 2,
    /// f32 server timestamp opening each snapshot.
    Time = 7,
    Print = 8,
    /// Per-entity baseline record in the signon stream.
    SpawnBaseline = 22,
    /// Signon stage advance during the post-accept handshake.
    SignonNum = 25,
}

impl ServerOp {
    pub fn from_u8(v: u8) -> Option<ServerOp> {
        match v {
            1 => Some(ServerOp::Nop),
            2 => Some(ServerOp::Disconnect),
            7 => Some(ServerOp::Time),
            8 => Some(ServerOp::Print),
            22 => Some(ServerOp::SpawnBaseline),
            25 => Some(ServerOp::SignonNum),
            _ => None,
        }
    }
}

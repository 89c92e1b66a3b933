// error.rs — error taxonomy for the network core.
//
// Connectionless violations are silently dropped by the caller; in-connection
// violations are fatal to that connection only. The Display strings of
// NoResponse / BadResponse / Transport / Refused are the exact reason texts
// surfaced to the layer that initiated a connection attempt.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    /// A decoder read past the declared message bounds. The only safe
    /// response to a self-describing format going out of sync is to drop
    /// the whole session.
    #[error("message read past end")]
    ReadPastEnd,

    #[error("bad game magic")]
    BadMagic,

    #[error("incompatible protocol version {0}")]
    BadVersion(u8),

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    /// Entity number zero or past MAX_EDICTS in an update or baseline
    /// record.
    #[error("bad entity number {0}")]
    BadEntityNumber(u16),

    #[error("malformed packet header")]
    BadHeader,

    #[error("packet length field does not match payload")]
    LengthMismatch,

    /// Reliable message empty or larger than MAX_MESSAGE; rejected at send
    /// time, never partially transmitted.
    #[error("reliable message size out of range")]
    MessageTooLarge,

    /// A reliable message still awaits its ACK; the caller must check
    /// `can_send_message` before pushing another one.
    #[error("reliable channel busy")]
    ChannelBusy,

    /// Reassembly buffer exceeded MAX_MESSAGE. Fatal to the connection.
    #[error("reliable receive buffer overflow")]
    ReceiveOverflow,

    #[error("connection closed")]
    Closed,

    #[error("No Response")]
    NoResponse,

    #[error("Bad Response")]
    BadResponse,

    /// The server's literal rejection text, e.g. "Server is full.".
    #[error("{0}")]
    Refused(String),

    #[error("Network Error")]
    Transport(#[source] std::io::Error),
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        NetError::Transport(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_visible_reason_strings() {
        assert_eq!(NetError::NoResponse.to_string(), "No Response");
        assert_eq!(NetError::BadResponse.to_string(), "Bad Response");
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(NetError::Transport(io).to_string(), "Network Error");
        assert_eq!(
            NetError::Refused("Server is full.".into()).to_string(),
            "Server is full."
        );
    }
}

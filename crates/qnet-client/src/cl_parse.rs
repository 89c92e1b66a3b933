// cl_parse.rs — server message dispatch.
//
// Both delivery channels carry the same message format: a run of opcode-led
// records, with entity updates flagged by the high bit of their leading byte
// instead of an opcode. An unknown opcode is fatal; nothing after it can be
// framed.

use tracing::{debug, trace};

use qnet_common::entity::{read_baseline, U_SIGNAL};
use qnet_common::msg::MsgReader;
use qnet_common::svc::ServerOp;
use qnet_common::NetError;

use crate::cl_ents;
use crate::client::{ClientEvent, ClientState};

/// Parse one complete server message (a reliable message or one unreliable
/// snapshot) into state changes and events.
pub fn parse_server_message(
    cl: &mut ClientState,
    data: &[u8],
) -> Result<Vec<ClientEvent>, NetError> {
    let mut r = MsgReader::new(data);
    let mut events = Vec::new();

    while !r.is_empty() {
        let cmd = r.read_byte()?;

        if cmd & U_SIGNAL as u8 != 0 {
            cl_ents::parse_update(cl, &mut r, cmd, &mut events)?;
            continue;
        }

        match ServerOp::from_u8(cmd) {
            Some(ServerOp::Nop) => {}
            Some(ServerOp::Disconnect) => {
                debug!("server disconnect");
                events.push(ClientEvent::ServerDisconnected);
            }
            Some(ServerOp::Time) => {
                cl.mtime[1] = cl.mtime[0];
                cl.mtime[0] = r.read_float()? as f64;
                trace!(time = cl.mtime[0], "snapshot time");
            }
            Some(ServerOp::Print) => {
                events.push(ClientEvent::Print(r.read_string()?));
            }
            Some(ServerOp::SpawnBaseline) => {
                let (number, baseline) = read_baseline(&mut r)?;
                cl.entity_mut(number).baseline = baseline;
            }
            Some(ServerOp::SignonNum) => {
                cl.signon = r.read_byte()?;
                debug!(stage = cl.signon, "signon stage");
                events.push(ClientEvent::SignonStage(cl.signon));
            }
            None => return Err(NetError::UnknownOpcode(cmd)),
        }
    }

    Ok(events)
}

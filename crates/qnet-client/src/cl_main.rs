// cl_main.rs — client connect handshake and per-tick pump.
//
// The handshake is polled like everything else: `connect` fires the first
// request and returns immediately, and `pump` drives retries until the
// server accepts, rejects, or the attempts run out. On accept, all session
// traffic is redirected to the ephemeral port the server assigned.

use tracing::{debug, info, warn};

use qnet_common::control::ControlMessage;
use qnet_common::net::{Endpoint, NetAdr};
use qnet_common::net_chan::{ChannelEvent, Connection, NetConfig};
use qnet_common::wire::MAX_PACKET;
use qnet_common::NetError;

use crate::cl_parse;
use crate::client::{ClientEvent, ClientState};

enum Phase {
    Connecting { attempts: u32, last_send: f64 },
    Connected { conn: Connection },
    Disconnected,
}

pub struct Client<E: Endpoint> {
    ep: E,
    /// Listen address during the handshake, the per-client session address
    /// once accepted.
    server: NetAdr,
    config: NetConfig,
    phase: Phase,
    pub state: ClientState,
}

impl<E: Endpoint> Client<E> {
    /// Send the first connect request and return a handshaking client.
    pub fn connect(
        mut ep: E,
        server: NetAdr,
        config: NetConfig,
        now: f64,
    ) -> Result<Self, NetError> {
        info!(%server, "connecting");
        ep.send_to(&ControlMessage::ConnectRequest.encode_packet(), &server)?;
        Ok(Self {
            ep,
            server,
            config,
            phase: Phase::Connecting {
                attempts: 1,
                last_send: now,
            },
            state: ClientState::new(),
        })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.phase, Phase::Connected { .. })
    }

    /// The address session traffic goes to; the handshake rewrites the port.
    pub fn server_addr(&self) -> NetAdr {
        self.server
    }

    pub fn can_send_message(&self) -> bool {
        match &self.phase {
            Phase::Connected { conn } => conn.can_send_message(),
            _ => false,
        }
    }

    pub fn send_reliable(&mut self, data: &[u8], now: f64) -> Result<(), NetError> {
        match &mut self.phase {
            Phase::Connected { conn } => conn.send_message(&mut self.ep, data, now),
            _ => Err(NetError::Closed),
        }
    }

    pub fn send_unreliable(&mut self, data: &[u8], now: f64) -> Result<(), NetError> {
        match &mut self.phase {
            Phase::Connected { conn } => conn.send_unreliable(&mut self.ep, data, now),
            _ => Err(NetError::Closed),
        }
    }

    /// Abandon the session. Closing is local and final; the server notices
    /// via its own timeout.
    pub fn disconnect(&mut self) {
        debug!("disconnecting");
        self.phase = Phase::Disconnected;
    }

    /// Drain the endpoint, drive handshake retries and channel timers, and
    /// return the tick's events. An Err return means the session is over.
    pub fn pump(&mut self, now: f64) -> Result<Vec<ClientEvent>, NetError> {
        match self.phase {
            Phase::Connecting { .. } => self.pump_connecting(now),
            Phase::Connected { .. } => {
                let result = self.pump_connected(now);
                if result.is_err() {
                    self.phase = Phase::Disconnected;
                }
                result
            }
            Phase::Disconnected => Err(NetError::Closed),
        }
    }

    fn pump_connecting(&mut self, now: f64) -> Result<Vec<ClientEvent>, NetError> {
        let mut buf = [0u8; MAX_PACKET];
        while let Some((len, from)) = self.ep.recv_from(&mut buf)? {
            if !from.compare_base(&self.server) {
                debug!(%from, "handshake reply from unexpected host");
                continue;
            }
            match ControlMessage::decode_packet(&buf[..len]) {
                Ok(ControlMessage::Accept { port }) => {
                    self.server = self.server.with_port(port);
                    info!(server = %self.server, "connection accepted");
                    self.phase = Phase::Connected {
                        conn: Connection::new(self.server, now, self.config),
                    };
                    return Ok(vec![ClientEvent::Connected]);
                }
                Ok(ControlMessage::Reject { reason }) => {
                    warn!(%reason, "connection refused");
                    self.phase = Phase::Disconnected;
                    return Err(NetError::Refused(reason));
                }
                Ok(other) => {
                    debug!(opcode = other.opcode(), "ignoring control message");
                }
                Err(err) => {
                    warn!(%err, "garbled handshake reply");
                    self.phase = Phase::Disconnected;
                    return Err(NetError::BadResponse);
                }
            }
        }

        let (attempts, last_send) = match self.phase {
            Phase::Connecting { attempts, last_send } => (attempts, last_send),
            _ => return Ok(Vec::new()),
        };
        if now - last_send >= self.config.connect_timeout {
            if attempts >= self.config.connect_retries {
                warn!(attempts, "connect failed: no response");
                self.phase = Phase::Disconnected;
                return Err(NetError::NoResponse);
            }
            info!(attempt = attempts + 1, "still trying...");
            self.ep
                .send_to(&ControlMessage::ConnectRequest.encode_packet(), &self.server)?;
            self.phase = Phase::Connecting {
                attempts: attempts + 1,
                last_send: now,
            };
        }
        Ok(Vec::new())
    }

    fn pump_connected(&mut self, now: f64) -> Result<Vec<ClientEvent>, NetError> {
        let conn = match &mut self.phase {
            Phase::Connected { conn } => conn,
            _ => return Err(NetError::Closed),
        };

        let mut events = Vec::new();
        let mut buf = [0u8; MAX_PACKET];
        while let Some((len, from)) = self.ep.recv_from(&mut buf)? {
            if !from.compare(&conn.address) {
                debug!(%from, "packet from wrong source address");
                continue;
            }
            if let Some(delivered) = conn.process_packet(&mut self.ep, &buf[..len], now)? {
                let payload = match delivered {
                    ChannelEvent::Reliable(m) | ChannelEvent::Unreliable(m) => m,
                };
                events.extend(cl_parse::parse_server_message(&mut self.state, &payload)?);
            }
        }

        conn.update(&mut self.ep, now)?;
        let expired = conn.timed_out(now);
        if expired {
            warn!("server timed out");
            self.phase = Phase::Disconnected;
            return Err(NetError::NoResponse);
        }

        if events
            .iter()
            .any(|e| matches!(e, ClientEvent::ServerDisconnected))
        {
            self.phase = Phase::Disconnected;
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnet_common::msg::MsgWriter;
    use qnet_common::net::{Driver, LoopDriver, LoopEndpoint};
    use qnet_common::svc::ServerOp;
    use qnet_common::wire::{build_packet, PacketFlags};

    struct Handshake {
        driver: LoopDriver,
        listen: LoopEndpoint,
        client_addr: NetAdr,
        client: Client<LoopEndpoint>,
    }

    fn start_handshake() -> Handshake {
        let mut driver = LoopDriver::new();
        let listen = driver.open(26000).unwrap();
        let cep = driver.open(0).unwrap();
        let client_addr = cep.local_addr();
        let client =
            Client::connect(cep, NetAdr::loopback(26000), NetConfig::default(), 0.0).unwrap();
        Handshake {
            driver,
            listen,
            client_addr,
            client,
        }
    }

    fn recv_control(ep: &mut LoopEndpoint) -> Option<ControlMessage> {
        let mut buf = [0u8; MAX_PACKET];
        let (len, _) = ep.recv_from(&mut buf).unwrap()?;
        Some(ControlMessage::decode_packet(&buf[..len]).unwrap())
    }

    #[test]
    fn accept_redirects_to_session_port() {
        let mut h = start_handshake();
        assert_eq!(
            recv_control(&mut h.listen).unwrap(),
            ControlMessage::ConnectRequest
        );

        let session = h.driver.open(0).unwrap();
        let port = session.local_addr().port;
        h.listen
            .send_to(
                &ControlMessage::Accept { port }.encode_packet(),
                &h.client_addr,
            )
            .unwrap();

        let events = h.client.pump(0.1).unwrap();
        assert_eq!(events, vec![ClientEvent::Connected]);
        assert!(h.client.is_connected());
        assert_eq!(h.client.server_addr().port, port);
    }

    #[test]
    fn reject_surfaces_the_reason() {
        let mut h = start_handshake();
        h.listen
            .send_to(
                &ControlMessage::Reject {
                    reason: "Server is full.".into(),
                }
                .encode_packet(),
                &h.client_addr,
            )
            .unwrap();

        match h.client.pump(0.1) {
            Err(NetError::Refused(reason)) => assert_eq!(reason, "Server is full."),
            other => panic!("expected refusal, got {:?}", other),
        }
        assert!(!h.client.is_connected());
    }

    #[test]
    fn garbled_reply_fails_the_handshake() {
        let mut h = start_handshake();
        let mut w = MsgWriter::new();
        w.write_byte(qnet_common::control::CCREP_ACCEPT);
        w.write_string("HEXEN");
        w.write_byte(qnet_common::control::PROTOCOL_VERSION);
        w.write_long(26001);
        h.listen
            .send_to(&build_packet(PacketFlags::CTL, 0, w.as_slice()), &h.client_addr)
            .unwrap();

        assert!(matches!(h.client.pump(0.1), Err(NetError::BadResponse)));
    }

    #[test]
    fn handshake_retries_then_gives_up() {
        let mut h = start_handshake();
        assert!(recv_control(&mut h.listen).is_some());

        // inside the per-attempt timeout: nothing new
        assert!(h.client.pump(1.0).unwrap().is_empty());
        assert!(recv_control(&mut h.listen).is_none());

        // each elapsed timeout fires another request
        h.client.pump(2.6).unwrap();
        assert_eq!(
            recv_control(&mut h.listen).unwrap(),
            ControlMessage::ConnectRequest
        );
        h.client.pump(5.2).unwrap();
        assert_eq!(
            recv_control(&mut h.listen).unwrap(),
            ControlMessage::ConnectRequest
        );

        // attempts exhausted
        assert!(matches!(h.client.pump(7.8), Err(NetError::NoResponse)));
        assert!(recv_control(&mut h.listen).is_none());
    }

    #[test]
    fn connected_client_parses_reliable_traffic() {
        let mut h = start_handshake();
        recv_control(&mut h.listen);

        let mut session = h.driver.open(0).unwrap();
        h.listen
            .send_to(
                &ControlMessage::Accept {
                    port: session.local_addr().port,
                }
                .encode_packet(),
                &h.client_addr,
            )
            .unwrap();
        h.client.pump(0.1).unwrap();

        // server side of the session channel
        let mut conn = Connection::new(h.client_addr, 0.1, NetConfig::default());
        let mut msg = MsgWriter::new();
        msg.write_byte(ServerOp::Print as u8);
        msg.write_string("hello");
        conn.send_message(&mut session, msg.as_slice(), 0.1).unwrap();

        let events = h.client.pump(0.2).unwrap();
        assert_eq!(events, vec![ClientEvent::Print("hello".into())]);

        // the client's ACK frees the server channel
        let mut buf = [0u8; MAX_PACKET];
        while let Some((len, _)) = session.recv_from(&mut buf).unwrap() {
            conn.process_packet(&mut session, &buf[..len], 0.2).unwrap();
        }
        assert!(conn.can_send_message());
    }

    #[test]
    fn server_disconnect_ends_the_session() {
        let mut h = start_handshake();
        recv_control(&mut h.listen);

        let mut session = h.driver.open(0).unwrap();
        h.listen
            .send_to(
                &ControlMessage::Accept {
                    port: session.local_addr().port,
                }
                .encode_packet(),
                &h.client_addr,
            )
            .unwrap();
        h.client.pump(0.1).unwrap();

        let mut conn = Connection::new(h.client_addr, 0.1, NetConfig::default());
        conn.send_unreliable(&mut session, &[ServerOp::Disconnect as u8], 0.1)
            .unwrap();

        let events = h.client.pump(0.2).unwrap();
        assert_eq!(events, vec![ClientEvent::ServerDisconnected]);
        assert!(!h.client.is_connected());
        assert!(matches!(h.client.pump(0.3), Err(NetError::Closed)));
    }

    #[test]
    fn silent_server_times_out() {
        let mut h = start_handshake();
        recv_control(&mut h.listen);

        let session = h.driver.open(0).unwrap();
        h.listen
            .send_to(
                &ControlMessage::Accept {
                    port: session.local_addr().port,
                }
                .encode_packet(),
                &h.client_addr,
            )
            .unwrap();
        h.client.pump(0.1).unwrap();

        assert!(h.client.pump(30.0).unwrap().is_empty());
        assert!(matches!(h.client.pump(61.0), Err(NetError::NoResponse)));
    }
}

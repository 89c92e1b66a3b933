// sv_main.rs — server packet pump and connect handshake.
//
// One pump per simulation tick. The well-known listen endpoint only ever
// sees connectionless control packets; each accepted peer gets a dedicated
// ephemeral endpoint and all session traffic flows through it.

use tracing::{debug, info, warn};

use qnet_common::control::{ControlMessage, CCREQ_CONNECT, PROTOCOL_VERSION};
use qnet_common::entity::EntityState;
use qnet_common::net::{Driver, Endpoint, NetAdr};
use qnet_common::net_chan::{ChannelEvent, Connection, NetConfig};
use qnet_common::svc::ServerOp;
use qnet_common::wire::{PacketHeader, MAX_PACKET};
use qnet_common::NetError;

use crate::server::{SlotArena, SlotHandle};
use crate::sv_ents::{build_signon, build_snapshot, capture_baselines, ServerEntity};

pub const DEFAULT_PORT: u16 = 26000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_clients: usize,
    pub hostname: String,
    pub level_name: String,
    pub net: NetConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_clients: 8,
            hostname: "unnamed".into(),
            level_name: "".into(),
            net: NetConfig::default(),
        }
    }
}

/// What happened during a pump, for the caller-owned session loop.
#[derive(Debug)]
pub enum ServerEvent {
    ClientConnected(SlotHandle),
    ClientDropped { handle: SlotHandle, reason: String },
    Message { handle: SlotHandle, event: ChannelEvent },
}

/// Per-client slot: a dedicated endpoint, the logical connection, and the
/// scoreboard fields the player-info query reports.
pub struct ClientSlot<E: Endpoint> {
    ep: E,
    conn: Connection,
    pub name: String,
    pub colors: i32,
    pub frags: i32,
}

pub struct Server<D: Driver> {
    driver: D,
    listen: D::Endpoint,
    config: ServerConfig,
    clients: SlotArena<ClientSlot<D::Endpoint>>,
    rules: Vec<(String, String)>,
    baselines: Vec<EntityState>,
}

impl<D: Driver> Server<D> {
    pub fn bind(mut driver: D, config: ServerConfig) -> Result<Self, NetError> {
        let listen = driver.open(config.port)?;
        info!(addr = %listen.local_addr(), "server listening");
        Ok(Self {
            driver,
            listen,
            clients: SlotArena::with_capacity(config.max_clients),
            config,
            rules: Vec::new(),
            baselines: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> NetAdr {
        self.listen.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, handle: SlotHandle) -> Option<&ClientSlot<D::Endpoint>> {
        self.clients.get(handle)
    }

    pub fn client_mut(&mut self, handle: SlotHandle) -> Option<&mut ClientSlot<D::Endpoint>> {
        self.clients.get_mut(handle)
    }

    /// Rules reported by the paginated rule-info query, in cursor order.
    pub fn set_rules(&mut self, rules: Vec<(String, String)>) {
        self.rules = rules;
    }

    /// Record level-spawn baselines. Supersedes any previous level's set.
    pub fn spawn_level(&mut self, level_name: &str, entities: &[ServerEntity]) {
        self.config.level_name = level_name.to_string();
        self.baselines = capture_baselines(entities);
    }

    // =========================================================================
    // Per-tick pump
    // =========================================================================

    /// Drain the listen endpoint and every client endpoint, poll retransmit
    /// and timeout timers, and return the tick's events.
    pub fn pump(&mut self, now: f64) -> Result<Vec<ServerEvent>, NetError> {
        let mut events = Vec::new();
        let mut buf = [0u8; MAX_PACKET];

        // connectionless requests on the well-known port
        while let Some((len, from)) = self.listen.recv_from(&mut buf)? {
            self.handle_control(&buf[..len], &from, now, &mut events);
        }

        // per-connection traffic
        for handle in self.clients.handles() {
            if let Err(err) = self.pump_client(handle, now, &mut events) {
                self.drop_client(handle, &err.to_string(), &mut events);
            }
        }

        Ok(events)
    }

    fn pump_client(
        &mut self,
        handle: SlotHandle,
        now: f64,
        events: &mut Vec<ServerEvent>,
    ) -> Result<(), NetError> {
        let mut buf = [0u8; MAX_PACKET];
        let slot = match self.clients.get_mut(handle) {
            Some(slot) => slot,
            None => return Ok(()),
        };

        while let Some((len, from)) = slot.ep.recv_from(&mut buf)? {
            if !from.compare(&slot.conn.address) {
                debug!(%from, "packet from wrong source address");
                continue;
            }
            if let Some(event) = slot.conn.process_packet(&mut slot.ep, &buf[..len], now)? {
                events.push(ServerEvent::Message { handle, event });
            }
        }

        slot.conn.update(&mut slot.ep, now)?;
        let expired = slot.conn.timed_out(now);

        if expired {
            self.drop_client(handle, "timed out", events);
        }
        Ok(())
    }

    // =========================================================================
    // Connectionless protocol
    // =========================================================================

    fn handle_control(
        &mut self,
        packet: &[u8],
        from: &NetAdr,
        now: f64,
        events: &mut Vec<ServerEvent>,
    ) {
        let msg = match ControlMessage::decode_packet(packet) {
            Ok(msg) => msg,
            Err(err @ (NetError::BadMagic | NetError::BadVersion(_))) => {
                // a connect attempt from an incompatible game still gets a
                // reason back; everything else is dropped silently
                if control_opcode(packet) == Some(CCREQ_CONNECT) {
                    debug!(%from, %err, "rejecting incompatible connect request");
                    self.send_control(
                        &ControlMessage::Reject {
                            reason: "Incompatible version.".into(),
                        },
                        from,
                    );
                }
                return;
            }
            Err(err) => {
                debug!(%from, %err, "bad connectionless packet");
                return;
            }
        };

        match msg {
            ControlMessage::ConnectRequest => self.handle_connect(from, now, events),
            ControlMessage::ServerInfoRequest => {
                let reply = ControlMessage::ServerInfoReply {
                    address: self.listen.local_addr().to_string(),
                    hostname: self.config.hostname.clone(),
                    level_name: self.config.level_name.clone(),
                    current_players: self.clients.len() as u8,
                    max_players: self.clients.capacity() as u8,
                    version: PROTOCOL_VERSION,
                };
                self.send_control(&reply, from);
            }
            ControlMessage::PlayerInfoRequest { player } => {
                // the player number indexes active clients in slot order
                let reply = self.clients.iter().nth(player as usize).map(|(_, slot)| {
                    ControlMessage::PlayerInfoReply {
                        player,
                        name: slot.name.clone(),
                        colors: slot.colors,
                        frags: slot.frags,
                        connect_seconds: (now - slot.conn.connect_time) as i32,
                        address: slot.conn.address.to_string(),
                    }
                });
                if let Some(reply) = reply {
                    self.send_control(&reply, from);
                }
            }
            ControlMessage::RuleInfoRequest { prev_rule } => {
                let next = if prev_rule.is_empty() {
                    self.rules.first()
                } else {
                    self.rules
                        .iter()
                        .position(|(name, _)| *name == prev_rule)
                        .and_then(|i| self.rules.get(i + 1))
                };
                let reply = match next {
                    Some((rule, value)) => ControlMessage::RuleInfoReply {
                        rule: rule.clone(),
                        value: value.clone(),
                    },
                    None => ControlMessage::RuleInfoReply {
                        rule: String::new(),
                        value: String::new(),
                    },
                };
                self.send_control(&reply, from);
            }
            // replies have no business arriving on the listen port
            _ => debug!(%from, "unexpected control reply, ignored"),
        }
    }

    fn handle_connect(&mut self, from: &NetAdr, now: f64, events: &mut Vec<ServerEvent>) {
        // a repeat request from an already-accepted address is either the
        // retry of a client that missed our reply, or a stale session
        let existing = self
            .clients
            .iter()
            .find(|(_, slot)| slot.conn.address.compare(from))
            .map(|(handle, slot)| (handle, slot.conn.connect_time, slot.ep.local_addr().port));

        if let Some((handle, connect_time, port)) = existing {
            if now - connect_time < self.config.net.duplicate_connect_window {
                debug!(%from, "duplicate connect request, resending accept");
                self.send_control(&ControlMessage::Accept { port }, from);
                return;
            }
            info!(%from, "replacing stale connection");
            self.drop_client(handle, "superseded by reconnect", events);
        }

        if self.clients.is_full() {
            debug!(%from, "connect rejected: server is full");
            self.send_control(
                &ControlMessage::Reject {
                    reason: "Server is full.".into(),
                },
                from,
            );
            return;
        }

        // dedicate an ephemeral endpoint to this peer
        let ep = match self.driver.open(0) {
            Ok(ep) => ep,
            Err(err) => {
                warn!(%err, "failed to open per-client endpoint");
                return;
            }
        };
        let port = ep.local_addr().port;
        let slot = ClientSlot {
            ep,
            conn: Connection::new(*from, now, self.config.net),
            name: String::new(),
            colors: 0,
            frags: 0,
        };
        // capacity was checked above
        if let Some(handle) = self.clients.insert(slot) {
            info!(%from, port, "client connected");
            self.send_control(&ControlMessage::Accept { port }, from);
            events.push(ServerEvent::ClientConnected(handle));
        }
    }

    fn send_control(&mut self, msg: &ControlMessage, to: &NetAdr) {
        if let Err(err) = self.listen.send_to(&msg.encode_packet(), to) {
            warn!(%to, %err, "control reply send failed");
        }
    }

    // =========================================================================
    // Outbound session traffic
    // =========================================================================

    /// True when the client's reliable channel can take another message.
    pub fn can_send_message(&self, handle: SlotHandle) -> bool {
        self.clients
            .get(handle)
            .is_some_and(|slot| slot.conn.can_send_message())
    }

    pub fn send_reliable(
        &mut self,
        handle: SlotHandle,
        data: &[u8],
        now: f64,
    ) -> Result<(), NetError> {
        let slot = self.clients.get_mut(handle).ok_or(NetError::Closed)?;
        slot.conn.send_message(&mut slot.ep, data, now)
    }

    pub fn send_unreliable(
        &mut self,
        handle: SlotHandle,
        data: &[u8],
        now: f64,
    ) -> Result<(), NetError> {
        let slot = self.clients.get_mut(handle).ok_or(NetError::Closed)?;
        slot.conn.send_unreliable(&mut slot.ep, data, now)
    }

    /// Send the level's baselines and the signon stage advance over the
    /// reliable channel.
    pub fn send_signon(&mut self, handle: SlotHandle, now: f64) -> Result<(), NetError> {
        let signon = build_signon(&self.baselines, 1);
        self.send_reliable(handle, &signon, now)
    }

    /// Serialize this tick's visible entities for one client onto the
    /// unreliable channel.
    pub fn send_snapshot(
        &mut self,
        handle: SlotHandle,
        server_time: f32,
        entities: &[ServerEntity],
        now: f64,
    ) -> Result<(), NetError> {
        let snapshot = build_snapshot(server_time, &self.baselines, entities);
        self.send_unreliable(handle, &snapshot, now)
    }

    /// Tear down a connection. Closing is final; a best-effort disconnect
    /// notice is sent but never retried.
    pub fn drop_client(&mut self, handle: SlotHandle, reason: &str, events: &mut Vec<ServerEvent>) {
        if let Some(mut slot) = self.clients.remove(handle) {
            info!(addr = %slot.conn.address, reason, "dropping client");
            let notice = [ServerOp::Disconnect as u8];
            let when = slot.conn.connect_time;
            let _ = slot.conn.send_unreliable(&mut slot.ep, &notice, when);
            events.push(ServerEvent::ClientDropped {
                handle,
                reason: reason.to_string(),
            });
        }
    }
}

/// Opcode byte of a control packet, if it parses far enough to have one.
fn control_opcode(packet: &[u8]) -> Option<u8> {
    let (_, payload) = PacketHeader::decode(packet).ok()?;
    payload.first().copied()
}

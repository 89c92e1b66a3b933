// net_chan.rs — logical per-peer connection.
//
// Two independent delivery channels over one datagram endpoint:
//
//   reliable   — stop-and-wait, fragmenting, acknowledged. Exactly one
//                message is in flight per direction; `can_send_message` is
//                false while a fragment awaits its ACK.
//   unreliable — sequenced, loss-tolerant. Stale and duplicate datagrams are
//                discarded; gaps only advance the expectation, because every
//                datagram is a complete, self-contained snapshot.
//
// Timeouts are polled against the tick time handed in by the caller; there
// are no scheduled callbacks and no background I/O thread.

use tracing::{debug, trace, warn};

use crate::error::NetError;
use crate::net::{Endpoint, NetAdr};
use crate::wire::{build_packet, PacketFlags, PacketHeader, MAX_DATAGRAM, MAX_MESSAGE};

/// Tunables for the transport. The defaults are the historical constants;
/// they are fields rather than hard-coded because no adaptive-RTT rationale
/// exists for them.
#[derive(Debug, Clone, Copy)]
pub struct NetConfig {
    /// Resend the outstanding reliable fragment after this many seconds
    /// without an ACK. Same sequence number, no backoff.
    pub resend_timeout: f64,
    /// Seconds to wait for a handshake reply per connect attempt.
    pub connect_timeout: f64,
    /// Connect attempts before giving up with "No Response".
    pub connect_retries: u32,
    /// A second connect request from an address whose accepted connection is
    /// younger than this is an idempotent retry, not a new connection.
    pub duplicate_connect_window: f64,
    /// Drop a connection after this long without any valid packet.
    pub connection_timeout: f64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            resend_timeout: 1.0,
            connect_timeout: 2.5,
            connect_retries: 3,
            duplicate_connect_window: 2.0,
            connection_timeout: 60.0,
        }
    }
}

/// A message delivered by the channel to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A fully reassembled reliable message (EOM fragment arrived).
    Reliable(Vec<u8>),
    /// One whole unreliable datagram.
    Unreliable(Vec<u8>),
}

/// Per-peer connection state. Owned and mutated only by the tick loop that
/// processes it; no locking.
#[derive(Debug)]
pub struct Connection {
    pub address: NetAdr,
    pub connect_time: f64,
    /// Tick time of the last valid packet from the peer.
    pub last_message_time: f64,

    // reliable channel
    send_sequence: u32,
    receive_sequence: u32,
    ack_sequence: u32,
    can_send: bool,
    send_message: Vec<u8>,
    receive_message: Vec<u8>,
    last_send_time: f64,

    // unreliable channel
    unreliable_send_sequence: u32,
    unreliable_receive_sequence: u32,

    // diagnostics
    pub dropped_datagrams: u32,
    pub stale_datagrams: u32,
    pub duplicate_fragments: u32,

    config: NetConfig,
}

impl Connection {
    pub fn new(address: NetAdr, now: f64, config: NetConfig) -> Self {
        Self {
            address,
            connect_time: now,
            last_message_time: now,
            send_sequence: 0,
            receive_sequence: 0,
            ack_sequence: 0,
            can_send: true,
            send_message: Vec::new(),
            receive_message: Vec::new(),
            last_send_time: now,
            unreliable_send_sequence: 0,
            unreliable_receive_sequence: 0,
            dropped_datagrams: 0,
            stale_datagrams: 0,
            duplicate_fragments: 0,
            config,
        }
    }

    /// True when the reliable channel is idle and another message may be
    /// queued. This flag is the channel's only backpressure mechanism.
    pub fn can_send_message(&self) -> bool {
        self.can_send
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Queue a reliable message and transmit its first fragment.
    pub fn send_message(
        &mut self,
        ep: &mut impl Endpoint,
        data: &[u8],
        now: f64,
    ) -> Result<(), NetError> {
        if data.is_empty() || data.len() > MAX_MESSAGE {
            return Err(NetError::MessageTooLarge);
        }
        if !self.can_send {
            return Err(NetError::ChannelBusy);
        }

        self.send_message.clear();
        self.send_message.extend_from_slice(data);
        self.can_send = false;
        self.send_fragment(ep, false, now)
    }

    /// Send one datagram on the unreliable channel.
    pub fn send_unreliable(
        &mut self,
        ep: &mut impl Endpoint,
        data: &[u8],
        now: f64,
    ) -> Result<(), NetError> {
        if data.len() > MAX_DATAGRAM {
            return Err(NetError::MessageTooLarge);
        }
        let packet = build_packet(
            PacketFlags::UNRELIABLE,
            self.unreliable_send_sequence,
            data,
        );
        self.unreliable_send_sequence += 1;
        ep.send_to(&packet, &self.address)?;
        self.last_send_time = now;
        Ok(())
    }

    /// Transmit the head of the pending reliable message. A resend reuses
    /// the sequence number of the outstanding fragment.
    fn send_fragment(
        &mut self,
        ep: &mut impl Endpoint,
        resend: bool,
        now: f64,
    ) -> Result<(), NetError> {
        let data_len = self.send_message.len().min(MAX_DATAGRAM);
        let mut flags = PacketFlags::DATA;
        if data_len == self.send_message.len() {
            flags |= PacketFlags::EOM;
        }

        let sequence = if resend {
            self.send_sequence - 1
        } else {
            let s = self.send_sequence;
            self.send_sequence += 1;
            s
        };

        let packet = build_packet(flags, sequence, &self.send_message[..data_len]);
        ep.send_to(&packet, &self.address)?;
        self.last_send_time = now;
        Ok(())
    }

    /// Poll timers: retransmit the outstanding fragment when its ACK is
    /// overdue. Call once per tick.
    pub fn update(&mut self, ep: &mut impl Endpoint, now: f64) -> Result<(), NetError> {
        if !self.can_send && now - self.last_send_time > self.config.resend_timeout {
            trace!(seq = self.send_sequence - 1, "resending reliable fragment");
            self.send_fragment(ep, true, now)?;
        }
        Ok(())
    }

    /// True when the peer has been silent past the connection timeout.
    pub fn timed_out(&self, now: f64) -> bool {
        now - self.last_message_time > self.config.connection_timeout
    }

    /// Process one physical packet addressed to this connection. Returns a
    /// delivered message, if any. An Err return is fatal to the connection.
    pub fn process_packet(
        &mut self,
        ep: &mut impl Endpoint,
        packet: &[u8],
        now: f64,
    ) -> Result<Option<ChannelEvent>, NetError> {
        let (header, payload) = PacketHeader::decode(packet)?;
        let sequence = header.sequence;

        if header.flags.contains(PacketFlags::UNRELIABLE) {
            if sequence < self.unreliable_receive_sequence {
                debug!(sequence, "stale datagram");
                self.stale_datagrams += 1;
                return Ok(None);
            }
            if sequence != self.unreliable_receive_sequence {
                let skipped = sequence - self.unreliable_receive_sequence;
                self.dropped_datagrams += skipped;
                debug!(skipped, total = self.dropped_datagrams, "dropped datagrams");
            }
            self.unreliable_receive_sequence = sequence + 1;
            self.last_message_time = now;
            return Ok(Some(ChannelEvent::Unreliable(payload.to_vec())));
        }

        if header.flags.contains(PacketFlags::ACK) {
            if sequence != self.send_sequence.wrapping_sub(1) {
                trace!(sequence, "stale ACK");
                return Ok(None);
            }
            if sequence != self.ack_sequence {
                trace!(sequence, "duplicate ACK");
                return Ok(None);
            }
            self.ack_sequence += 1;
            self.last_message_time = now;

            // drop the acknowledged head; send the next fragment or go idle
            let acked = self.send_message.len().min(MAX_DATAGRAM);
            self.send_message.drain(..acked);
            if self.send_message.is_empty() {
                self.can_send = true;
            } else {
                self.send_fragment(ep, false, now)?;
            }
            return Ok(None);
        }

        if header.flags.contains(PacketFlags::DATA) {
            // always re-ACK: the sender may have missed the previous ACK
            let ack = build_packet(PacketFlags::ACK, sequence, &[]);
            ep.send_to(&ack, &self.address)?;

            if sequence != self.receive_sequence {
                self.duplicate_fragments += 1;
                trace!(sequence, "duplicate reliable fragment");
                return Ok(None);
            }
            self.receive_sequence += 1;
            self.last_message_time = now;

            if self.receive_message.len() + payload.len() > MAX_MESSAGE {
                return Err(NetError::ReceiveOverflow);
            }
            self.receive_message.extend_from_slice(payload);

            if header.flags.contains(PacketFlags::EOM) {
                let message = std::mem::take(&mut self.receive_message);
                return Ok(Some(ChannelEvent::Reliable(message)));
            }
            return Ok(None);
        }

        // CTL or an otherwise nonsensical flag combination is a protocol
        // violation once a connection exists
        warn!(flags = ?header.flags, "unexpected packet class in connection");
        Err(NetError::BadHeader)
    }
}

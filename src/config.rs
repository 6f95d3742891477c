use crate::packet_header::{PacketHeader, MAX_DATAGRAM_SIZE};
use anyhow::bail;
use std::time::Duration;
use uuid::Uuid;

/// How the transport learns its peer's address.
#[derive(Clone, Debug)]
pub enum PeerDiscovery {
    /// Register with a matchmaking server that pairs one sender and one
    ///  receiver per socket id and tells each the other's public endpoint.
    ///  The local socket binds an ephemeral port.
    Rendezvous { server_host: String, server_port: u16 },

    /// Pre-agreed peer address, no matchmaking involved. The transport
    ///  binds `listen_port` and sends periodic punches as pure keep-alive.
    Static {
        remote_host: String,
        remote_port: u16,
        listen_port: u16,
    },
}

/// Startup configuration, read once and immutable for the transport's
///  lifetime.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Session identifier both peers register under; the matchmaking server
    ///  matches a sender and a receiver carrying the same socket id.
    pub socket_id: String,

    /// Role within the session. The matchmaking server pairs exactly one
    ///  sender with one receiver; data may still flow in both directions.
    pub is_sender: bool,

    /// Device identity sent along with registrations. Defaults to a freshly
    ///  generated UUID.
    pub device_uid: String,

    pub discovery: PeerDiscovery,

    /// Total size cutoff per datagram, header included. Fragment payloads
    ///  are cut at this minus the header length.
    pub max_datagram_size: usize,

    /// How often to (re)register with the matchmaking server while no
    ///  connection is established.
    pub register_interval: Duration,

    /// How often to punch the peer while connected.
    pub heartbeat_interval: Duration,

    /// A silent peer is considered gone after this long.
    pub connection_timeout: Duration,

    /// Upper bound on concurrently reassembling multi-part messages; beyond
    ///  it the oldest incomplete message is abandoned.
    pub max_pending_reassemblies: usize,

    /// Upper bound on fragments per message. Inbound fragments declaring
    ///  more are dropped rather than allocated for; outbound messages are
    ///  effectively capped at this times the fragment payload size.
    pub max_message_parts: usize,

    /// OS-level socket send/receive buffer sizing, to ride out bursts of
    ///  large fragmented messages.
    pub socket_buffer_size: usize,
}

impl TransportConfig {
    pub fn new(socket_id: impl Into<String>, is_sender: bool, discovery: PeerDiscovery) -> TransportConfig {
        TransportConfig {
            socket_id: socket_id.into(),
            is_sender,
            device_uid: Uuid::new_v4().to_string(),
            discovery,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            register_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(2),
            connection_timeout: Duration::from_secs(5),
            max_pending_reassemblies: 64,
            max_message_parts: 4096,
            socket_buffer_size: 65_507 * 32,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.socket_id.is_empty() {
            bail!("socket id must not be empty");
        }
        if self.max_datagram_size <= PacketHeader::SERIALIZED_LEN {
            bail!("max datagram size must leave room for payload beyond the {}-byte header", PacketHeader::SERIALIZED_LEN);
        }
        if self.max_datagram_size > 65_507 {
            bail!("max datagram size exceeds what a UDP datagram can carry");
        }
        if self.register_interval.is_zero() || self.heartbeat_interval.is_zero() {
            bail!("register and heartbeat intervals must be positive");
        }
        if self.connection_timeout <= self.heartbeat_interval {
            bail!("connection timeout must exceed the heartbeat interval, or liveness will flap");
        }
        if self.max_pending_reassemblies == 0 {
            bail!("at least one pending reassembly must be allowed");
        }
        if self.max_message_parts == 0 {
            bail!("messages need at least one part");
        }
        Ok(())
    }

    /// Largest payload chunk that fits one datagram next to the header.
    pub fn max_fragment_payload(&self) -> usize {
        self.max_datagram_size - PacketHeader::SERIALIZED_LEN
    }
}

//! Peer-to-peer UDP message transport with rendezvous-server hole punching.
//!
//! Two endpoints behind NATs discover each other through a matchmaking
//!  server, punch a direct UDP path, and then exchange whole binary
//!  *messages* of arbitrary size - the transport fragments them across
//!  datagrams and reassembles them on the far side.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *messages* (defined-length
//!   chunks of data, not byte streams). Payloads are opaque; a one-byte
//!   family/type pair travels with each message so applications can
//!   dispatch without peeking into the bytes.
//! * Application calls never block on the network: `send` enqueues
//!   fragments for a dedicated send task, `receive` polls a queue filled by
//!   a dedicated receive task, and a per-frame `tick` drives all
//!   time-based behavior with externally supplied time.
//! * Fire-and-forget delivery. Fragments of a message may arrive in any
//!   order and are reassembled by explicit index; fragments that never
//!   arrive leave the message incomplete and it is eventually abandoned.
//!   There is deliberately no retransmission, acknowledgement, congestion
//!   control or encryption - applications that need those layer them on
//!   top or use a different transport.
//! * Liveness, not connections: the path is "connected" while evidence of a
//!   reachable peer (any data fragment or punch) is at most a timeout old.
//!
//! ## Wire format
//!
//! Control datagrams (matchmaking and hole punching) are a marker byte with
//!  the value 100 followed by a JSON document, see [`rendezvous`].
//!
//! Every data-plane datagram starts with a fixed 24-byte header, all
//!  integers in network byte order (BE):
//!
//! ```ascii
//! 0:  message family (u8)
//! 1:  message type (u8)
//! 2:  reserved, zero (u16)
//! 4:  sequence id (u32) - sender-assigned, shared by all fragments
//!      of one message
//! 8:  parts total (u32) - number of fragments, >= 1
//! 12: part index (u32) - 0-based position of this fragment
//! 16: timestamp (u64) - sender wall clock, milliseconds since the epoch
//! ```
//!
//! The payload is the remainder of the datagram. Datagrams are capped at
//!  60000 bytes including the header.
//!
//! ## Rendezvous
//!
//! Both clients periodically send `register` (their session id, role and
//!  LAN address) to the matchmaking server from the very socket they will
//!  talk through, so the server sees their NAT-mapped public endpoints.
//!  Once a sender and a receiver with the same session id have registered,
//!  the server sends each an `answer` carrying the other's endpoint. On
//!  receiving it, a client fires two immediate `punch` datagrams at the
//!  peer - opening its own NAT for the peer's punches - and keeps punching
//!  on a heartbeat interval from then on.

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod fragmentation;
pub mod message;
pub mod observer;
pub mod packet_header;
pub mod reassembly;
pub mod rendezvous;
pub mod send_pipeline;

pub use config::{PeerDiscovery, TransportConfig};
pub use endpoint::{PeerEndpoint, TrafficStats};
pub use message::{Message, MessageFamily, DEFAULT_MESSAGE_TYPE};
pub use observer::{MessageObserver, ObserverId};

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}

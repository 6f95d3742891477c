use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::time::SystemTime;

/// Well-known message family codes. The transport treats payloads as opaque
///  bytes, so this registry exists purely so applications on both ends can
///  agree on what a datagram carries without inventing their own constants.
///
/// NB: `Matchmaking` shares its numeric value with the control marker byte -
///      a datagram starting with 0x64 is always parsed as a control message.
#[derive(Clone, Copy, Eq, PartialEq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageFamily {
    Matchmaking = 0x64,
    Rgbd = 0x02,
    RgbdCommand = 0x12,
    Mocap = 0x03,
    Audio = 0x04,
    Xr = 0x10,
    Data = 0x14,
}

/// Message type used when the application does not care to distinguish.
pub const DEFAULT_MESSAGE_TYPE: u8 = 0x00;

/// A whole application-level message: what `send()` accepts before
///  fragmentation, and what the receive path emits after reassembly.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Message {
    pub family: u8,
    pub message_type: u8,
    /// Stamped by the sender per message; 0 for local-only observer taps
    ///  that never reached the wire.
    pub sequence_id: u32,
    /// Sender wall clock, milliseconds since the unix epoch.
    pub timestamp_millis: u64,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(family: u8, message_type: u8, payload: Vec<u8>) -> Message {
        Message {
            family,
            message_type,
            sequence_id: 0,
            timestamp_millis: unix_millis(),
            payload,
        }
    }
}

/// Milliseconds since the unix epoch. A clock before the epoch maps to 0.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

use serde::{Deserialize, Serialize};
use tracing::warn;

/// First byte of every control datagram. Data-plane datagrams never start
///  with this value - it doubles as the matchmaking message family code.
pub const CONTROL_MARKER: u8 = 100;

/// The JSON bodies exchanged with the matchmaking server and, once the
///  peer's address is known, directly with the peer.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// client -> server: announce this endpoint under a session id and role;
    ///  the server pairs one sender and one receiver per socket id
    Register {
        #[serde(rename = "socketID")]
        socket_id: String,
        #[serde(rename = "isSender")]
        is_sender: bool,
        #[serde(rename = "localIP")]
        local_ip: String,
        #[serde(rename = "UID")]
        uid: String,
    },
    /// server -> client: the matched peer's public endpoint
    Answer { address: String, port: u16 },
    /// client <-> client: hole-punching probe and keep-alive
    Punch,
}

/// Marker byte followed by the JSON body.
pub fn encode_control(message: &ControlMessage) -> Vec<u8> {
    let mut buf = vec![CONTROL_MARKER];
    let json = serde_json::to_vec(message).expect("control messages serialize infallibly");
    buf.extend_from_slice(&json);
    buf
}

/// Classifies a received datagram. `None` means "not a control datagram" -
///  hand it to the data plane. `Some(Err)` means the datagram claimed to be
///  a control message but its JSON did not parse; callers drop it without
///  touching connection state.
pub fn try_decode_control(datagram: &[u8]) -> Option<anyhow::Result<ControlMessage>> {
    if datagram.first() != Some(&CONTROL_MARKER) {
        return None;
    }
    Some(serde_json::from_slice(&datagram[1..]).map_err(Into::into))
}

/// The LAN address reported in register messages, so the server could match
///  clients on the same network directly. Connecting a UDP socket sends
///  nothing; it only makes the OS pick the route and source address.
pub fn discover_local_ip() -> String {
    let result = std::net::UdpSocket::bind(("0.0.0.0", 0)).and_then(|socket| {
        socket.connect(("8.8.8.8", 80))?;
        socket.local_addr()
    });
    match result {
        Ok(addr) => addr.ip().to_string(),
        Err(e) => {
            warn!("could not determine local IP address: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ControlMessage::Register {
        socket_id: "studio".to_string(),
        is_sender: true,
        local_ip: "192.168.1.23".to_string(),
        uid: "device-1".to_string(),
    })]
    #[case(ControlMessage::Answer { address: "10.0.0.5".to_string(), port: 7000 })]
    #[case(ControlMessage::Punch)]
    fn test_control_round_trip(#[case] message: ControlMessage) {
        let encoded = encode_control(&message);
        assert_eq!(encoded[0], CONTROL_MARKER);

        let decoded = try_decode_control(&encoded).unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_punch_wire_format() {
        let encoded = encode_control(&ControlMessage::Punch);
        assert_eq!(encoded[0], CONTROL_MARKER);
        assert_eq!(&encoded[1..], br#"{"type":"punch"}"#);
    }

    #[test]
    fn test_register_field_names() {
        let encoded = encode_control(&ControlMessage::Register {
            socket_id: "s".to_string(),
            is_sender: false,
            local_ip: "ip".to_string(),
            uid: "u".to_string(),
        });
        let json: serde_json::Value = serde_json::from_slice(&encoded[1..]).unwrap();
        assert_eq!(json["type"], "register");
        assert_eq!(json["socketID"], "s");
        assert_eq!(json["isSender"], false);
        assert_eq!(json["localIP"], "ip");
        assert_eq!(json["UID"], "u");
    }

    #[test]
    fn test_answer_parses_from_server_json() {
        let mut datagram = vec![CONTROL_MARKER];
        datagram.extend_from_slice(br#"{"type":"answer","address":"10.0.0.5","port":7000}"#);

        let decoded = try_decode_control(&datagram).unwrap().unwrap();
        assert_eq!(
            decoded,
            ControlMessage::Answer { address: "10.0.0.5".to_string(), port: 7000 }
        );
    }

    #[test]
    fn test_data_datagram_is_not_control() {
        assert!(try_decode_control(&[0x14, 0, 0, 0]).is_none());
        assert!(try_decode_control(&[]).is_none());
    }

    #[test]
    fn test_malformed_control_json_is_reported() {
        let mut datagram = vec![CONTROL_MARKER];
        datagram.extend_from_slice(b"{not json");
        assert!(try_decode_control(&datagram).unwrap().is_err());

        let mut unknown = vec![CONTROL_MARKER];
        unknown.extend_from_slice(br#"{"type":"reboot"}"#);
        assert!(try_decode_control(&unknown).unwrap().is_err());
    }
}

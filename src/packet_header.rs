use anyhow::bail;
use bytes::{Buf, BufMut};

/// Total size cutoff for a single data-plane datagram, header included.
///  Well below the 65507-byte UDP payload ceiling so oversized-datagram
///  behavior of intermediate hops never comes into play.
pub const MAX_DATAGRAM_SIZE: usize = 60_000;

/// Fixed header preceding every data-plane datagram.
///
/// All integers are in network byte order. The layout is versioned by being
///  the only one this crate speaks - there is no negotiation.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct PacketHeader {
    pub family: u8,
    pub message_type: u8,
    /// Sender-assigned message id; all fragments of one message share it.
    pub sequence_id: u32,
    /// Number of fragments the message was split into, >= 1.
    pub parts_total: u32,
    /// 0-based position of this fragment, < `parts_total`.
    pub part_index: u32,
    /// Sender wall clock, milliseconds since the unix epoch.
    pub timestamp_millis: u64,
}

impl PacketHeader {
    pub const SERIALIZED_LEN: usize = 24;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.family);
        buf.put_u8(self.message_type);
        buf.put_u16(0); // reserved
        buf.put_u32(self.sequence_id);
        buf.put_u32(self.parts_total);
        buf.put_u32(self.part_index);
        buf.put_u64(self.timestamp_millis);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        let family = buf.try_get_u8()?;
        let message_type = buf.try_get_u8()?;
        let _reserved = buf.try_get_u16()?;
        let sequence_id = buf.try_get_u32()?;
        let parts_total = buf.try_get_u32()?;
        let part_index = buf.try_get_u32()?;
        let timestamp_millis = buf.try_get_u64()?;

        if parts_total == 0 {
            bail!("header declares zero parts");
        }
        if part_index >= parts_total {
            bail!("part index {} out of range for {} parts", part_index, parts_total);
        }

        Ok(PacketHeader {
            family,
            message_type,
            sequence_id,
            parts_total,
            part_index,
            timestamp_millis,
        })
    }
}

/// Builds the wire form of one fragment: header followed by the chunk.
pub fn encode_fragment(header: &PacketHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PacketHeader::SERIALIZED_LEN + payload.len());
    header.ser(&mut buf);
    buf.put_slice(payload);
    buf
}

/// Splits a received datagram into header and payload. Anything shorter than
///  the fixed header length, or carrying inconsistent part fields, is
///  rejected here so the receive loop can drop it in one place.
pub fn decode_fragment(datagram: &[u8]) -> anyhow::Result<(PacketHeader, &[u8])> {
    let mut buf = datagram;
    let header = PacketHeader::deser(&mut buf)?;
    Ok((header, buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PacketHeader { family: 0x14, message_type: 0, sequence_id: 0, parts_total: 1, part_index: 0, timestamp_millis: 0 })]
    #[case(PacketHeader { family: 0x02, message_type: 0x21, sequence_id: 12345, parts_total: 17, part_index: 16, timestamp_millis: 1_700_000_000_000 })]
    #[case(PacketHeader { family: 0xff, message_type: 0xff, sequence_id: u32::MAX, parts_total: u32::MAX, part_index: u32::MAX - 1, timestamp_millis: u64::MAX })]
    fn test_header_ser_deser(#[case] header: PacketHeader) {
        let mut buf = Vec::new();
        header.ser(&mut buf);
        assert_eq!(buf.len(), PacketHeader::SERIALIZED_LEN);

        let mut b: &[u8] = &buf;
        let deser = PacketHeader::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, header);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(PacketHeader::SERIALIZED_LEN - 1)]
    fn test_decode_rejects_short_buffer(#[case] len: usize) {
        let datagram = vec![0u8; len];
        assert!(decode_fragment(&datagram).is_err());
    }

    #[test]
    fn test_decode_rejects_zero_parts() {
        let header = PacketHeader {
            family: 0x14,
            message_type: 0,
            sequence_id: 1,
            parts_total: 1,
            part_index: 0,
            timestamp_millis: 0,
        };
        let mut buf = encode_fragment(&header, b"x");
        // overwrite parts_total with 0
        buf[8..12].copy_from_slice(&0u32.to_be_bytes());
        assert!(decode_fragment(&buf).is_err());
    }

    #[test]
    fn test_decode_rejects_part_index_out_of_range() {
        let header = PacketHeader {
            family: 0x14,
            message_type: 0,
            sequence_id: 1,
            parts_total: 1,
            part_index: 0,
            timestamp_millis: 0,
        };
        let mut buf = encode_fragment(&header, b"x");
        buf[12..16].copy_from_slice(&1u32.to_be_bytes());
        assert!(decode_fragment(&buf).is_err());
    }

    #[test]
    fn test_fragment_round_trip_splits_payload() {
        let header = PacketHeader {
            family: 0x04,
            message_type: 0x11,
            sequence_id: 7,
            parts_total: 3,
            part_index: 1,
            timestamp_millis: 42,
        };
        let payload = vec![0xabu8; 100];

        let datagram = encode_fragment(&header, &payload);
        assert_eq!(datagram.len(), PacketHeader::SERIALIZED_LEN + 100);

        let (deser, body) = decode_fragment(&datagram).unwrap();
        assert_eq!(deser, header);
        assert_eq!(body, &payload[..]);
    }

    #[test]
    fn test_empty_payload_fragment() {
        let header = PacketHeader {
            family: 0x14,
            message_type: 0,
            sequence_id: 1,
            parts_total: 1,
            part_index: 0,
            timestamp_millis: 0,
        };
        let datagram = encode_fragment(&header, &[]);
        let (_, body) = decode_fragment(&datagram).unwrap();
        assert!(body.is_empty());
    }
}

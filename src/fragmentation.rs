//! Splitting whole messages into datagram-sized chunks. Reassembly of the
//!  chunks on the receiving side lives in [`crate::reassembly`].

/// Splits a payload into ordered chunks of at most `max_chunk` bytes; the
///  last chunk carries the remainder. An empty payload yields no chunks at
///  all - nothing is put on the wire for it.
pub fn fragment(payload: &[u8], max_chunk: usize) -> impl Iterator<Item = &[u8]> {
    payload.chunks(max_chunk)
}

/// Number of chunks [`fragment`] produces: `ceil(payload_len / max_chunk)`.
pub fn parts_total(payload_len: usize, max_chunk: usize) -> u32 {
    payload_len.div_ceil(max_chunk) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1000, 0, vec![])]
    #[case(1, 1000, 1, vec![1])]
    #[case(1000, 1000, 1, vec![1000])]
    #[case(1001, 1000, 2, vec![1000, 1])]
    #[case(2500, 1000, 3, vec![1000, 1000, 500])]
    #[case(3000, 1000, 3, vec![1000, 1000, 1000])]
    fn test_fragment_sizes(
        #[case] payload_len: usize,
        #[case] max_chunk: usize,
        #[case] expected_parts: u32,
        #[case] expected_chunk_lens: Vec<usize>,
    ) {
        let payload = vec![0u8; payload_len];

        let chunk_lens: Vec<usize> = fragment(&payload, max_chunk).map(<[u8]>::len).collect();
        assert_eq!(chunk_lens, expected_chunk_lens);
        assert_eq!(parts_total(payload_len, max_chunk), expected_parts);
    }

    #[test]
    fn test_fragment_preserves_content_and_order() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(2500).collect();

        let reassembled: Vec<u8> = fragment(&payload, 1000).flatten().copied().collect();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn test_no_chunk_exceeds_max() {
        for n in 0..100 {
            let payload = vec![7u8; n];
            assert!(fragment(&payload, 13).all(|c| c.len() <= 13));
        }
    }
}

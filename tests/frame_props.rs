//! Property tests for the frame codec.

use gpst::wire::{HeaderField, HEADER_LEN};
use gpst::{decode_frame, decode_header, encode_header};
use proptest::prelude::*;

proptest! {
    #[test]
    fn header_round_trips_every_length(n in any::<u16>()) {
        let hdr = encode_header(n);
        let decoded = decode_header(&hdr).unwrap();
        prop_assert_eq!(decoded.payload_len, n);
        prop_assert_eq!(decoded.frame_len(), HEADER_LEN + n as usize);
    }

    #[test]
    fn frame_yields_its_payload(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let mut frame = encode_header(payload.len() as u16).to_vec();
        frame.extend_from_slice(&payload);
        let (hdr, body) = decode_frame(&frame).unwrap();
        prop_assert_eq!(hdr.payload_len as usize, payload.len());
        prop_assert_eq!(body, &payload[..]);
    }

    #[test]
    fn corrupted_header_byte_is_attributed(
        len in 0u16..512,
        offset in 0usize..HEADER_LEN,
        flip in 1u8..=255,
    ) {
        let mut frame = encode_header(len).to_vec();
        frame.resize(HEADER_LEN + len as usize, 0xa5);
        frame[offset] ^= flip;

        let err = decode_frame(&frame).unwrap_err();
        prop_assert_eq!(Some(err.field()), HeaderField::at(offset));
    }
}

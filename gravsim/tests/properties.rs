use proptest::prelude::*;

use gravsim::network::codec::{decode_client_message, decode_positions, encode_positions};
use gravsim::simulation::rng::DeterministicRng;

proptest! {
    #[test]
    fn position_frames_round_trip(tick in any::<u64>(), coords in prop::collection::vec(-1e12f64..1e12, 0..40)) {
        let n = coords.len() / 3 * 3;
        let positions = &coords[..n];
        let frame = decode_positions(&encode_positions(tick, positions)).unwrap();
        prop_assert_eq!(frame.tick, tick as u32);
        prop_assert_eq!(frame.body_count(), n / 3);
        prop_assert_eq!(frame.positions.as_slice(), positions);
    }

    #[test]
    fn decoding_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        if let Ok(frame) = decode_positions(&bytes) {
            prop_assert_eq!(bytes.len(), 8 + 24 * frame.body_count());
        }
    }

    #[test]
    fn arbitrary_text_is_an_error_not_a_panic(text in ".{0,64}") {
        let _ = decode_client_message(&text);
    }

    #[test]
    fn rng_range_stays_in_bounds(seed in any::<u64>(), lo in -1e6f64..1e6, width in 1e-6f64..1e6) {
        let mut rng = DeterministicRng::new(seed);
        for _ in 0..32 {
            let x = rng.range(lo, lo + width);
            prop_assert!(x >= lo && x <= lo + width);
        }
    }

    #[test]
    fn rng_next_below_is_bounded(seed in any::<u64>(), n in 1u64..1000) {
        let mut rng = DeterministicRng::new(seed);
        for _ in 0..32 {
            prop_assert!(rng.next_below(n) < n);
        }
    }

    #[test]
    fn rng_state_restore_continues_the_stream(seed in any::<u64>(), skip in 0usize..64) {
        let mut a = DeterministicRng::new(seed);
        for _ in 0..skip {
            a.next_u64();
        }
        let mut b = DeterministicRng::new(seed ^ 0xdead_beef);
        b.set_state(a.get_state()).unwrap();
        for _ in 0..16 {
            prop_assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn unit_vectors_have_unit_length(seed in any::<u64>()) {
        let mut rng = DeterministicRng::new(seed);
        let v = rng.unit_vector();
        prop_assert!((v.norm() - 1.0).abs() < 1e-12);
    }
}

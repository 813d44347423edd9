//! Integration tests for the vendor packet framer and device matcher
//!
//! Covers:
//! - Packet shape for arbitrary universes (length, headers, terminator)
//! - Channel placement across sub-block boundaries
//! - Determinism of reframing
//! - Device family membership

use proptest::prelude::*;
use protocol::{
    DMX_CHANNELS, DeviceIdentity, OutputSummary, PACKET_SIZE, PACKET_TERMINATOR,
    SUB_BLOCK_COUNT, SUB_BLOCK_SIZE, SUIDI_VENDOR_ID, SUPPORTED_PRODUCT_IDS, TimerGranularity,
    channel_offset, frame, frame_into, is_supported_device,
};

fn universe_strategy() -> impl Strategy<Value = [u8; DMX_CHANNELS]> {
    prop::collection::vec(any::<u8>(), DMX_CHANNELS).prop_map(|v| {
        let mut channels = [0u8; DMX_CHANNELS];
        channels.copy_from_slice(&v);
        channels
    })
}

mod packet_shape {
    use super::*;

    #[test]
    fn test_all_zero_universe() {
        let packet = frame(&[0u8; DMX_CHANNELS]);
        assert_eq!(packet.len(), PACKET_SIZE);
        assert_eq!(packet[PACKET_SIZE - 1], PACKET_TERMINATOR);
    }

    #[test]
    fn test_all_full_universe() {
        let packet = frame(&[0xFFu8; DMX_CHANNELS]);
        assert_eq!(packet.len(), PACKET_SIZE);
        assert_eq!(packet[PACKET_SIZE - 1], PACKET_TERMINATOR);
        for k in 0..SUB_BLOCK_COUNT {
            assert_eq!(packet[k * SUB_BLOCK_SIZE], k as u8);
        }
    }

    proptest! {
        #[test]
        fn prop_terminator_and_headers(channels in universe_strategy()) {
            let packet = frame(&channels);
            prop_assert_eq!(packet.len(), PACKET_SIZE);
            prop_assert_eq!(packet[PACKET_SIZE - 1], PACKET_TERMINATOR);
            for k in 0..SUB_BLOCK_COUNT {
                prop_assert_eq!(packet[k * SUB_BLOCK_SIZE], k as u8);
            }
        }

        #[test]
        fn prop_every_channel_at_its_offset(channels in universe_strategy()) {
            let packet = frame(&channels);
            for (i, value) in channels.iter().enumerate() {
                let offset = channel_offset(i).unwrap();
                prop_assert_eq!(packet[offset], *value);
            }
        }

        #[test]
        fn prop_reframing_is_idempotent(channels in universe_strategy()) {
            let first = frame(&channels);
            let second = frame(&channels);
            prop_assert_eq!(first, second);

            let mut reused = [0xA5u8; PACKET_SIZE];
            frame_into(&mut reused, &channels);
            frame_into(&mut reused, &channels);
            prop_assert_eq!(first, reused);
        }
    }
}

mod channel_placement {
    use super::*;

    fn single_channel(index: usize, value: u8) -> [u8; PACKET_SIZE] {
        let mut channels = [0u8; DMX_CHANNELS];
        channels[index] = value;
        frame(&channels)
    }

    #[test]
    fn test_first_channel() {
        let packet = single_channel(0, 0x42);
        assert_eq!(packet[0], 0);
        assert_eq!(packet[1], 0x42);
    }

    #[test]
    fn test_last_channel_of_first_block() {
        let packet = single_channel(56, 0x42);
        assert_eq!(packet[57], 0x42);
        // Zero fill follows the payload
        assert!(packet[58..64].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_first_channel_of_second_block() {
        let packet = single_channel(57, 0x42);
        assert_eq!(packet[64], 1);
        assert_eq!(packet[65], 0x42);
    }

    #[test]
    fn test_last_channel() {
        let packet = single_channel(511, 0x42);
        assert_eq!(packet[512], 8);
        assert_eq!(packet[568], 0x42);
        assert!(packet[569..575].iter().all(|b| *b == 0));
        assert_eq!(packet[575], PACKET_TERMINATOR);
    }
}

mod device_matching {
    use super::*;

    #[test]
    fn test_every_supported_product_matches() {
        for pid in SUPPORTED_PRODUCT_IDS {
            assert!(is_supported_device(SUIDI_VENDOR_ID, pid), "{:#06x}", pid);
            assert!(DeviceIdentity::new(SUIDI_VENDOR_ID, pid).is_supported());
        }
    }

    #[test]
    fn test_supported_product_count() {
        assert_eq!(SUPPORTED_PRODUCT_IDS.len(), 31);
    }

    proptest! {
        #[test]
        fn prop_unknown_pairs_rejected(vid in any::<u16>(), pid in any::<u16>()) {
            let expected = vid == SUIDI_VENDOR_ID && SUPPORTED_PRODUCT_IDS.contains(&pid);
            prop_assert_eq!(is_supported_device(vid, pid), expected);
        }
    }
}

mod serialization {
    use super::*;

    #[test]
    fn test_output_summary_json() {
        let summary = OutputSummary {
            index: 2,
            name: "SUIDI 4 U3".to_string(),
            universe: 2,
            info: "Device not in use".to_string(),
        };

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"name\":\"SUIDI 4 U3\""));

        let parsed: OutputSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, summary);
    }

    #[test]
    fn test_granularity_json_is_lowercase() {
        let json = serde_json::to_string(&TimerGranularity::Bad).unwrap();
        assert_eq!(json, "\"bad\"");
    }
}

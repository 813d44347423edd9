//! Vendor packet framing
//!
//! A DMX universe of 512 channel values travels to the interface as a single
//! 576-byte bulk packet made of nine 64-byte sub-blocks:
//!
//! ```text
//! +--------+-------------------------+-----------+
//! | k (1B) | channel bytes (<= 57 B) | zero fill |   x 9, k = 0..=8
//! +--------+-------------------------+-----------+
//! ```
//!
//! Channel bytes run on across sub-block boundaries. Nine sub-blocks have room
//! for 513 payload bytes, so the stream runs dry one byte early: the last
//! sub-block carries 56 channels and its zero fill starts right after them.
//! The firmware expects exactly this shape. Finally the last byte of the
//! packet is forced to [`PACKET_TERMINATOR`].

use crate::error::{ProtocolError, Result};
use crate::types::ControlRequest;
use std::time::Duration;

/// Number of channels in one DMX universe
pub const DMX_CHANNELS: usize = 512;

/// Size of one vendor bulk packet
pub const PACKET_SIZE: usize = 576;

/// Size of one sub-block inside a packet
pub const SUB_BLOCK_SIZE: usize = 64;

/// Number of sub-blocks in a packet
pub const SUB_BLOCK_COUNT: usize = PACKET_SIZE / SUB_BLOCK_SIZE;

/// Channel bytes carried by one sub-block after its header byte
pub const SUB_BLOCK_PAYLOAD: usize = 57;

/// Fixed value of the last packet byte
pub const PACKET_TERMINATOR: u8 = 0xFF;

/// One framed universe, ready for a bulk transfer
pub type Packet = [u8; PACKET_SIZE];

/// Vendor strobe sent once after every frame's bulk transfers
pub const END_OF_FRAME_STROBE: ControlRequest = ControlRequest {
    // Device-to-host | vendor | device
    request_type: 0xC0,
    request: 0x08,
    value: 0x0000,
    index: 0x0000,
    length: 2,
    timeout: Duration::from_millis(10),
};

/// Frame a universe into a new packet
pub fn frame(channels: &[u8; DMX_CHANNELS]) -> Packet {
    let mut packet = [0u8; PACKET_SIZE];
    frame_into(&mut packet, channels);
    packet
}

/// Frame a universe into an existing packet buffer
///
/// The whole buffer is rewritten, so the result only depends on `channels`.
pub fn frame_into(packet: &mut Packet, channels: &[u8; DMX_CHANNELS]) {
    packet.fill(0);

    let blocks = packet.chunks_exact_mut(SUB_BLOCK_SIZE);
    for (k, (block, payload)) in blocks.zip(channels.chunks(SUB_BLOCK_PAYLOAD)).enumerate() {
        block[0] = k as u8;
        block[1..=payload.len()].copy_from_slice(payload);
    }

    packet[PACKET_SIZE - 1] = PACKET_TERMINATOR;
}

/// Frame channel data of arbitrary length
///
/// Short input is treated as a universe whose remaining channels are zero.
/// Input longer than [`DMX_CHANNELS`] is rejected.
pub fn frame_slice(data: &[u8]) -> Result<Packet> {
    if data.len() > DMX_CHANNELS {
        return Err(ProtocolError::InvalidChannelCount {
            expected: DMX_CHANNELS,
            actual: data.len(),
        });
    }

    let mut channels = [0u8; DMX_CHANNELS];
    channels[..data.len()].copy_from_slice(data);
    Ok(frame(&channels))
}

/// Packet for an all-zero universe
pub fn blank_packet() -> Packet {
    frame(&[0u8; DMX_CHANNELS])
}

/// Byte offset of a channel inside a framed packet
///
/// Returns `None` for channels outside the universe.
pub fn channel_offset(channel: usize) -> Option<usize> {
    if channel >= DMX_CHANNELS {
        return None;
    }

    let block = channel / SUB_BLOCK_PAYLOAD;
    Some(block * SUB_BLOCK_SIZE + 1 + channel % SUB_BLOCK_PAYLOAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry() {
        assert_eq!(SUB_BLOCK_COUNT, 9);
        assert_eq!(SUB_BLOCK_COUNT * SUB_BLOCK_SIZE, PACKET_SIZE);
        assert!(SUB_BLOCK_COUNT * SUB_BLOCK_PAYLOAD > DMX_CHANNELS);
    }

    #[test]
    fn test_blank_packet() {
        let packet = blank_packet();
        for k in 0..SUB_BLOCK_COUNT {
            assert_eq!(packet[k * SUB_BLOCK_SIZE], k as u8);
        }
        assert_eq!(packet[PACKET_SIZE - 1], PACKET_TERMINATOR);

        let non_zero = packet.iter().filter(|b| **b != 0).count();
        // Headers 1..=8 plus the terminator
        assert_eq!(non_zero, 9);
    }

    #[test]
    fn test_final_sub_block_short_fill() {
        let packet = frame(&[0xAA; DMX_CHANNELS]);
        let last = &packet[8 * SUB_BLOCK_SIZE..];

        assert_eq!(last[0], 8);
        assert!(last[1..=56].iter().all(|b| *b == 0xAA));
        assert!(last[57..63].iter().all(|b| *b == 0));
        assert_eq!(last[63], PACKET_TERMINATOR);
    }

    #[test]
    fn test_full_sub_block_zero_fill() {
        let packet = frame(&[0x11; DMX_CHANNELS]);
        for k in 0..8 {
            let block = &packet[k * SUB_BLOCK_SIZE..(k + 1) * SUB_BLOCK_SIZE];
            assert!(block[1..=SUB_BLOCK_PAYLOAD].iter().all(|b| *b == 0x11));
            assert!(block[SUB_BLOCK_PAYLOAD + 1..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn test_frame_into_overwrites_stale_content() {
        let mut packet = [0x55u8; PACKET_SIZE];
        let channels = [0x01u8; DMX_CHANNELS];
        frame_into(&mut packet, &channels);
        assert_eq!(packet, frame(&channels));
    }

    #[test]
    fn test_frame_slice_pads_short_input() {
        let packet = frame_slice(&[9, 8, 7]).unwrap();
        let mut channels = [0u8; DMX_CHANNELS];
        channels[..3].copy_from_slice(&[9, 8, 7]);
        assert_eq!(packet, frame(&channels));
    }

    #[test]
    fn test_frame_slice_rejects_long_input() {
        let err = frame_slice(&[0u8; 513]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidChannelCount {
                expected: 512,
                actual: 513
            }
        );
    }

    #[test]
    fn test_channel_offset() {
        assert_eq!(channel_offset(0), Some(1));
        assert_eq!(channel_offset(56), Some(57));
        assert_eq!(channel_offset(57), Some(65));
        assert_eq!(channel_offset(511), Some(568));
        assert_eq!(channel_offset(512), None);
    }

    #[test]
    fn test_strobe_is_vendor_read() {
        assert_eq!(END_OF_FRAME_STROBE.request_type & 0x80, 0x80);
        assert_eq!(END_OF_FRAME_STROBE.request_type & 0x60, 0x40);
        assert_eq!(END_OF_FRAME_STROBE.length, 2);
    }
}

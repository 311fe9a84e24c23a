//! Fixed-layout binary codec for the rover link
//!
//! Every frame is one message on the channel, first byte is the kind
//! discriminator, all multi-byte fields are little-endian:
//!
//! ```text
//! 0x01 Twist        [disc][linear f64][angular f64]                = 17 bytes
//! 0x02 EStop        [disc]                                         =  1 byte
//! 0x03 Heartbeat    [disc]                                         =  1 byte
//! 0x04 SetMode      [disc][mode u8]                                =  2 bytes
//! 0x05 Tool         [disc][axis f32][motor f32][a u8][b u8]        = 11 bytes
//! 0x06 EStopRelease [disc]                                         =  1 byte
//! 0x10 Telemetry    [disc][mode][pose 3xf64][batt f64][ts u64]
//!                   [vel 2xf64][temps 4xf32][currents 4xf32]       = 90 bytes
//! 0x20 VideoFrame   [disc][ts u64][width u16][height u16][payload] >= 14 bytes
//! ```
//!
//! Encoding performs no clamping; callers pre-validate ranges. Decoding
//! returns `None` on any validation failure (short buffer, unknown
//! discriminator, unknown mode byte) and never reads past the checked length.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{CommandFrame, Mode, Pose, Telemetry, ToolCommand, Twist, Velocity, VideoFrame};

/// Frame discriminators
pub const FRAME_TWIST: u8 = 0x01;
pub const FRAME_ESTOP: u8 = 0x02;
pub const FRAME_HEARTBEAT: u8 = 0x03;
pub const FRAME_SET_MODE: u8 = 0x04;
pub const FRAME_TOOL: u8 = 0x05;
pub const FRAME_ESTOP_RELEASE: u8 = 0x06;
pub const FRAME_TELEMETRY: u8 = 0x10;
pub const FRAME_VIDEO: u8 = 0x20;

/// Exact length of a telemetry frame
pub const TELEMETRY_LEN: usize = 90;

/// Minimum length of a video frame (13-byte header + payload)
pub const VIDEO_MIN_LEN: usize = 14;

fn read_f64(data: &[u8], at: usize) -> Option<f64> {
    let bytes: [u8; 8] = data.get(at..at + 8)?.try_into().ok()?;
    Some(f64::from_le_bytes(bytes))
}

fn read_f32(data: &[u8], at: usize) -> Option<f32> {
    let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
    Some(f32::from_le_bytes(bytes))
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    let bytes: [u8; 2] = data.get(at..at + 2)?.try_into().ok()?;
    Some(u16::from_le_bytes(bytes))
}

/// Timestamps travel as two 4-byte halves: `low + high * 2^32`
fn read_u64_halves(data: &[u8], at: usize) -> Option<u64> {
    let low = read_u32(data, at)? as u64;
    let high = read_u32(data, at + 4)? as u64;
    Some(low | (high << 32))
}

/// Encode a client-to-rover command frame
pub fn encode_command(frame: &CommandFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(17);
    match frame {
        CommandFrame::Twist(twist) => {
            buf.put_u8(FRAME_TWIST);
            buf.put_f64_le(twist.linear);
            buf.put_f64_le(twist.angular);
        }
        CommandFrame::EStop => buf.put_u8(FRAME_ESTOP),
        CommandFrame::Heartbeat => buf.put_u8(FRAME_HEARTBEAT),
        CommandFrame::SetMode(mode) => {
            buf.put_u8(FRAME_SET_MODE);
            buf.put_u8(mode.as_u8());
        }
        CommandFrame::Tool(tool) => {
            buf.put_u8(FRAME_TOOL);
            buf.put_f32_le(tool.axis);
            buf.put_f32_le(tool.motor);
            buf.put_u8(tool.action_a as u8);
            buf.put_u8(tool.action_b as u8);
        }
        CommandFrame::EStopRelease => buf.put_u8(FRAME_ESTOP_RELEASE),
    }
    buf.freeze()
}

/// Decode a client-to-rover command frame (rover side)
///
/// A Twist frame may carry one optional trailing boost byte from older
/// senders; it is read when present and defaults to false.
pub fn decode_command(data: &[u8]) -> Option<CommandFrame> {
    match *data.first()? {
        FRAME_TWIST if data.len() >= 17 => Some(CommandFrame::Twist(Twist {
            linear: read_f64(data, 1)?,
            angular: read_f64(data, 9)?,
            boost: data.get(17).map(|b| *b != 0).unwrap_or(false),
        })),
        FRAME_ESTOP => Some(CommandFrame::EStop),
        FRAME_HEARTBEAT => Some(CommandFrame::Heartbeat),
        FRAME_SET_MODE if data.len() >= 2 => Some(CommandFrame::SetMode(Mode::from_u8(data[1])?)),
        FRAME_TOOL if data.len() >= 11 => Some(CommandFrame::Tool(ToolCommand {
            axis: read_f32(data, 1)?,
            motor: read_f32(data, 5)?,
            action_a: data[9] != 0,
            action_b: data[10] != 0,
        })),
        FRAME_ESTOP_RELEASE => Some(CommandFrame::EStopRelease),
        _ => None,
    }
}

/// Encode a telemetry frame (rover side)
pub fn encode_telemetry(telemetry: &Telemetry) -> Bytes {
    let mut buf = BytesMut::with_capacity(TELEMETRY_LEN);
    buf.put_u8(FRAME_TELEMETRY);
    buf.put_u8(telemetry.mode.as_u8());
    buf.put_f64_le(telemetry.pose.x);
    buf.put_f64_le(telemetry.pose.y);
    buf.put_f64_le(telemetry.pose.theta);
    buf.put_f64_le(telemetry.battery_voltage);
    buf.put_u32_le(telemetry.timestamp_ms as u32);
    buf.put_u32_le((telemetry.timestamp_ms >> 32) as u32);
    buf.put_f64_le(telemetry.velocity.linear);
    buf.put_f64_le(telemetry.velocity.angular);
    for temp in telemetry.motor_temps {
        buf.put_f32_le(temp);
    }
    for current in telemetry.motor_currents {
        buf.put_f32_le(current);
    }
    buf.freeze()
}

/// Decode a telemetry frame
pub fn decode_telemetry(data: &[u8]) -> Option<Telemetry> {
    if data.len() < TELEMETRY_LEN || data[0] != FRAME_TELEMETRY {
        return None;
    }
    Some(Telemetry {
        mode: Mode::from_u8(data[1])?,
        pose: Pose {
            x: read_f64(data, 2)?,
            y: read_f64(data, 10)?,
            theta: read_f64(data, 18)?,
        },
        battery_voltage: read_f64(data, 26)?,
        timestamp_ms: read_u64_halves(data, 34)?,
        velocity: Velocity {
            linear: read_f64(data, 42)?,
            angular: read_f64(data, 50)?,
        },
        motor_temps: [
            read_f32(data, 58)?,
            read_f32(data, 62)?,
            read_f32(data, 66)?,
            read_f32(data, 70)?,
        ],
        motor_currents: [
            read_f32(data, 74)?,
            read_f32(data, 78)?,
            read_f32(data, 82)?,
            read_f32(data, 86)?,
        ],
    })
}

/// Encode a video frame (rover side)
pub fn encode_video_frame(frame: &VideoFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(13 + frame.payload.len());
    buf.put_u8(FRAME_VIDEO);
    buf.put_u32_le(frame.timestamp_ms as u32);
    buf.put_u32_le((frame.timestamp_ms >> 32) as u32);
    buf.put_u16_le(frame.width);
    buf.put_u16_le(frame.height);
    buf.extend_from_slice(&frame.payload);
    buf.freeze()
}

/// Decode a video frame; the payload is copied out as opaque bytes
pub fn decode_video_frame(data: &[u8]) -> Option<VideoFrame> {
    if data.len() < VIDEO_MIN_LEN || data[0] != FRAME_VIDEO {
        return None;
    }
    Some(VideoFrame {
        timestamp_ms: read_u64_halves(data, 1)?,
        width: read_u16(data, 9)?,
        height: read_u16(data, 11)?,
        payload: Bytes::copy_from_slice(&data[13..]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_telemetry() -> Telemetry {
        Telemetry {
            mode: Mode::Teleop,
            pose: Pose {
                x: 1.25,
                y: -3.5,
                theta: 0.785,
            },
            battery_voltage: 24.6,
            // Past 2^32 ms so both timestamp halves carry bits
            timestamp_ms: 5_000_000_000,
            velocity: Velocity {
                linear: 0.8,
                angular: -0.2,
            },
            motor_temps: [40.0, 41.5, 39.25, 42.0],
            motor_currents: [1.1, 1.2, 0.9, 1.05],
        }
    }

    #[test]
    fn test_twist_roundtrip() {
        let frame = CommandFrame::Twist(Twist {
            linear: 0.75,
            angular: -1.5,
            boost: true,
        });
        let encoded = encode_command(&frame);
        assert_eq!(encoded.len(), 17);
        assert_eq!(encoded[0], FRAME_TWIST);

        match decode_command(&encoded).expect("decode failed") {
            CommandFrame::Twist(twist) => {
                assert_eq!(twist.linear, 0.75);
                assert_eq!(twist.angular, -1.5);
                // Boost is not part of the 17-byte layout
                assert!(!twist.boost);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_twist_trailing_boost_byte() {
        let mut encoded = encode_command(&CommandFrame::Twist(Twist {
            linear: 1.0,
            angular: 0.0,
            boost: false,
        }))
        .to_vec();
        encoded.push(1);

        match decode_command(&encoded).expect("decode failed") {
            CommandFrame::Twist(twist) => assert!(twist.boost),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_single_byte_frames() {
        for (frame, disc) in [
            (CommandFrame::EStop, FRAME_ESTOP),
            (CommandFrame::Heartbeat, FRAME_HEARTBEAT),
            (CommandFrame::EStopRelease, FRAME_ESTOP_RELEASE),
        ] {
            let encoded = encode_command(&frame);
            assert_eq!(&encoded[..], &[disc]);
            assert_eq!(decode_command(&encoded), Some(frame));
        }
    }

    #[test]
    fn test_set_mode_roundtrip() {
        let encoded = encode_command(&CommandFrame::SetMode(Mode::Autonomous));
        assert_eq!(&encoded[..], &[FRAME_SET_MODE, 3]);
        assert_eq!(
            decode_command(&encoded),
            Some(CommandFrame::SetMode(Mode::Autonomous))
        );

        // Unknown mode byte is rejected, not defaulted
        assert_eq!(decode_command(&[FRAME_SET_MODE, 99]), None);
    }

    #[test]
    fn test_tool_roundtrip() {
        let frame = CommandFrame::Tool(ToolCommand {
            axis: 0.5,
            motor: -0.25,
            action_a: true,
            action_b: false,
        });
        let encoded = encode_command(&frame);
        assert_eq!(encoded.len(), 11);
        assert_eq!(decode_command(&encoded), Some(frame));
    }

    #[test]
    fn test_command_rejects_bad_input() {
        assert_eq!(decode_command(&[]), None);
        assert_eq!(decode_command(&[0xAB]), None);
        // Truncated twist
        assert_eq!(decode_command(&encode_command(&CommandFrame::Twist(Twist::zero()))[..16]), None);
        // Truncated tool
        let tool = encode_command(&CommandFrame::Tool(ToolCommand::default()));
        assert_eq!(decode_command(&tool[..10]), None);
    }

    #[test]
    fn test_telemetry_roundtrip() {
        let original = sample_telemetry();
        let encoded = encode_telemetry(&original);
        assert_eq!(encoded.len(), TELEMETRY_LEN);
        assert_eq!(encoded[0], FRAME_TELEMETRY);

        let decoded = decode_telemetry(&encoded).expect("decode failed");
        assert_eq!(decoded.mode, original.mode);
        assert!((decoded.pose.x - original.pose.x).abs() < 1e-9);
        assert!((decoded.pose.y - original.pose.y).abs() < 1e-9);
        assert!((decoded.pose.theta - original.pose.theta).abs() < 1e-9);
        assert!((decoded.battery_voltage - original.battery_voltage).abs() < 1e-9);
        assert_eq!(decoded.timestamp_ms, original.timestamp_ms);
        assert!((decoded.velocity.linear - original.velocity.linear).abs() < 1e-9);
        assert!((decoded.velocity.angular - original.velocity.angular).abs() < 1e-9);
        for i in 0..4 {
            assert!((decoded.motor_temps[i] - original.motor_temps[i]).abs() < 1e-6);
            assert!((decoded.motor_currents[i] - original.motor_currents[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_telemetry_short_buffer() {
        let encoded = encode_telemetry(&sample_telemetry());
        for len in 0..TELEMETRY_LEN {
            assert_eq!(decode_telemetry(&encoded[..len]), None, "len {len}");
        }
    }

    #[test]
    fn test_telemetry_bad_discriminator() {
        let mut encoded = encode_telemetry(&sample_telemetry()).to_vec();
        encoded[0] = FRAME_VIDEO;
        assert_eq!(decode_telemetry(&encoded), None);
    }

    #[test]
    fn test_telemetry_bad_mode_byte() {
        let mut encoded = encode_telemetry(&sample_telemetry()).to_vec();
        encoded[1] = 200;
        assert_eq!(decode_telemetry(&encoded), None);
    }

    #[test]
    fn test_video_roundtrip() {
        let original = VideoFrame {
            timestamp_ms: 5_000_000_123,
            width: 1280,
            height: 720,
            payload: Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]),
        };
        let encoded = encode_video_frame(&original);
        assert_eq!(encoded.len(), 13 + 4);

        let decoded = decode_video_frame(&encoded).expect("decode failed");
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_video_short_buffer() {
        let encoded = encode_video_frame(&VideoFrame {
            timestamp_ms: 1,
            width: 2,
            height: 2,
            payload: Bytes::from_static(&[1, 2, 3, 4]),
        });
        for len in 0..VIDEO_MIN_LEN {
            assert_eq!(decode_video_frame(&encoded[..len]), None, "len {len}");
        }
        assert!(decode_video_frame(&encoded[..VIDEO_MIN_LEN]).is_some());
    }

    #[test]
    fn test_video_bad_discriminator() {
        let mut data = vec![0u8; 20];
        data[0] = FRAME_TELEMETRY;
        assert_eq!(decode_video_frame(&data), None);
    }
}

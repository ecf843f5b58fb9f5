use crate::{
    error::{PoolError, Result},
    types::{round_to, PoolStatus},
    MAGIC,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::Utc;

/// Command packet size in bytes
pub const COMMAND_SIZE: usize = 44;

/// Telemetry packet size in bytes
pub const TELEMETRY_SIZE: usize = 111;

/// Offset of the command packet checksum
pub const COMMAND_CRC_OFFSET: usize = 40;

/// Offset of the telemetry packet checksum
pub const TELEMETRY_CRC_OFFSET: usize = 107;

/// Constant trailer written before the command checksum
pub const COMMAND_CONSTANT: u32 = 412;

/// Length of the device name field
pub const DEVICE_NAME_LEN: usize = 13;

const COMMAND_PADDING: usize = 26;

/// Command kinds understood by the controller.
///
/// Byte values were captured from traffic between the manufacturer app and the
/// machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    /// Start the current
    Start = 0x1F,
    /// Stop the current
    Stop = 0x21,
    /// Set pace, parameter is seconds per 100 m
    SetSpeed = 0x24,
    /// Set timer, parameter is seconds
    SetTimer = 0x25,
}

impl CommandKind {
    /// Convert from u8
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x1F => Some(Self::Start),
            0x21 => Some(Self::Stop),
            0x24 => Some(Self::SetSpeed),
            0x25 => Some(Self::SetTimer),
            _ => None,
        }
    }
}

/// A logical command: what to do and with which parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRequest {
    /// Command kind
    pub kind: CommandKind,
    /// Parameter, zero for start and stop
    pub parameter: u16,
}

impl CommandRequest {
    /// Start the current
    #[must_use]
    pub const fn start() -> Self {
        Self {
            kind: CommandKind::Start,
            parameter: 0,
        }
    }

    /// Stop the current
    #[must_use]
    pub const fn stop() -> Self {
        Self {
            kind: CommandKind::Stop,
            parameter: 0,
        }
    }

    /// Set the pace from a speed parameter
    #[must_use]
    pub fn set_speed(speed_param: u8) -> Self {
        Self {
            kind: CommandKind::SetSpeed,
            parameter: u16::from(speed_param),
        }
    }

    /// Set the timer in seconds
    #[must_use]
    pub const fn set_timer(seconds: u16) -> Self {
        Self {
            kind: CommandKind::SetTimer,
            parameter: seconds,
        }
    }

    /// Build a wire packet for one transmission attempt
    #[must_use]
    pub fn to_packet(&self) -> Bytes {
        encode_command(self.kind, self.parameter)
    }
}

/// Command packet with every field explicit
///
/// Layout:
/// - Bytes 0-1: magic `0x0A 0xF0`
/// - Byte 2: transaction id
/// - Byte 3: command kind
/// - Bytes 4-5: parameter (u16 little-endian)
/// - Bytes 6-31: zero
/// - Bytes 32-35: Unix timestamp (u32 little-endian)
/// - Bytes 36-39: constant 412 (u32 little-endian)
/// - Bytes 40-43: CRC32 of bytes 0-39 (u32 little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPacket {
    /// Random per packet id
    pub transaction_id: u8,
    /// Command kind
    pub kind: CommandKind,
    /// Parameter
    pub parameter: u16,
    /// Unix seconds at build time
    pub timestamp: u32,
}

impl CommandPacket {
    /// Serialize to the 44-byte wire format
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(COMMAND_SIZE);

        buf.put_slice(&MAGIC);
        buf.put_u8(self.transaction_id);
        buf.put_u8(self.kind as u8);
        buf.put_u16_le(self.parameter);
        buf.put_bytes(0, COMMAND_PADDING);
        buf.put_u32_le(self.timestamp);
        buf.put_u32_le(COMMAND_CONSTANT);

        let crc = crc32fast::hash(&buf[..COMMAND_CRC_OFFSET]);
        buf.put_u32_le(crc);

        buf.freeze()
    }

    /// Parse and validate a command packet
    ///
    /// # Errors
    ///
    /// Returns a packet error if the length, magic, checksum, constant or
    /// command kind is wrong.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_frame(data, COMMAND_SIZE, COMMAND_CRC_OFFSET)?;

        let mut buf = &data[MAGIC.len()..];
        let transaction_id = buf.get_u8();
        let kind_byte = buf.get_u8();
        let parameter = buf.get_u16_le();
        buf.advance(COMMAND_PADDING);
        let timestamp = buf.get_u32_le();
        let constant = buf.get_u32_le();

        if constant != COMMAND_CONSTANT {
            return Err(PoolError::BadConstant(constant));
        }

        let kind = CommandKind::from_u8(kind_byte).ok_or(PoolError::UnknownCommand(kind_byte))?;

        Ok(Self {
            transaction_id,
            kind,
            parameter,
            timestamp,
        })
    }
}

/// Build a command packet with a random transaction id and the current time
///
/// Callers must keep `parameter` in range for the command; it is written as is.
#[must_use]
pub fn encode_command(kind: CommandKind, parameter: u16) -> Bytes {
    CommandPacket {
        transaction_id: rand::random(),
        kind,
        parameter,
        timestamp: unix_now(),
    }
    .to_bytes()
}

/// Parse a telemetry broadcast
///
/// Broadcast layout:
/// - Bytes 0-1: magic `0x0A 0xF0`
/// - Byte 2: state id
/// - Byte 3: status flags
/// - Byte 4: running flag, bit 6 clear while running
/// - Bytes 5-6: current and target motor level
/// - Byte 7: speed parameter (seconds per 100 m)
/// - Bytes 9-12: set and remaining timer (u16 little-endian)
/// - Bytes 23-30: segment and total distance (f32 little-endian, meters)
/// - Bytes 71-74: device timestamp (u32 little-endian)
/// - Bytes 79-91: device name, NUL terminated ASCII
/// - Bytes 107-110: CRC32 of bytes 0-106
///
/// # Errors
///
/// Returns a packet error if the length, magic or checksum is wrong.
pub fn decode_telemetry(data: &[u8]) -> Result<PoolStatus> {
    check_frame(data, TELEMETRY_SIZE, TELEMETRY_CRC_OFFSET)?;

    let mut buf = &data[MAGIC.len()..];

    let state_id = buf.get_u8();
    let status_flags = buf.get_u8();
    let running_flag = buf.get_u8();
    let current_speed = buf.get_u8();
    let target_speed = buf.get_u8();
    let speed_param = buf.get_u8();
    buf.advance(1);
    let set_timer = buf.get_u16_le();
    let remaining_timer = buf.get_u16_le();
    // bytes 13-22 hold the device id and unknown fields
    buf.advance(10);
    let segment_distance = buf.get_f32_le();
    let total_distance = buf.get_f32_le();
    buf.advance(40);
    let timestamp = buf.get_u32_le();
    buf.advance(4);
    let device_name = decode_name(&buf[..DEVICE_NAME_LEN]);

    Ok(PoolStatus {
        state_id,
        status_flags,
        is_running: running_flag & 0x40 == 0,
        current_speed,
        target_speed,
        speed_param,
        set_timer,
        remaining_timer,
        segment_distance: round_to(f64::from(segment_distance), 2),
        total_distance: round_to(f64::from(total_distance), 2),
        timestamp,
        device_name,
    })
}

/// Build a telemetry broadcast, as the machine would send it
///
/// Used by simulators and tests. Distances are written as f32 and the
/// device name is truncated to 12 bytes so it stays NUL terminated.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_telemetry(status: &PoolStatus) -> Bytes {
    let mut buf = BytesMut::with_capacity(TELEMETRY_SIZE);

    buf.put_slice(&MAGIC);
    buf.put_u8(status.state_id);
    buf.put_u8(status.status_flags);
    buf.put_u8(if status.is_running { 0x21 } else { 0x61 });
    buf.put_u8(status.current_speed);
    buf.put_u8(status.target_speed);
    buf.put_u8(status.speed_param);
    buf.put_u8(0);
    buf.put_u16_le(status.set_timer);
    buf.put_u16_le(status.remaining_timer);
    buf.put_bytes(0, 10);
    buf.put_f32_le(status.segment_distance as f32);
    buf.put_f32_le(status.total_distance as f32);
    buf.put_bytes(0, 40);
    buf.put_u32_le(status.timestamp);
    buf.put_bytes(0, 4);

    let name = status.device_name.as_bytes();
    let name_len = name.len().min(DEVICE_NAME_LEN - 1);
    buf.put_slice(&name[..name_len]);
    buf.put_bytes(0, DEVICE_NAME_LEN - name_len);

    buf.put_bytes(0, TELEMETRY_CRC_OFFSET - buf.len());
    let crc = crc32fast::hash(&buf[..TELEMETRY_CRC_OFFSET]);
    buf.put_u32_le(crc);

    buf.freeze()
}

/// Validate length, magic and trailing checksum of a packet
fn check_frame(data: &[u8], size: usize, crc_offset: usize) -> Result<()> {
    if data.len() != size {
        return Err(PoolError::InvalidLength {
            expected: size,
            got: data.len(),
        });
    }

    if data[..MAGIC.len()] != MAGIC {
        return Err(PoolError::BadMagic([data[0], data[1]]));
    }

    let mut trailer = &data[crc_offset..];
    let expected = trailer.get_u32_le();
    let got = crc32fast::hash(&data[..crc_offset]);
    if expected != got {
        return Err(PoolError::ChecksumMismatch { expected, got });
    }

    Ok(())
}

fn decode_name(field: &[u8]) -> String {
    field
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if b.is_ascii() { char::from(b) } else { char::REPLACEMENT_CHARACTER })
        .collect()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unix_now() -> u32 {
    Utc::now().timestamp() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status() -> PoolStatus {
        PoolStatus {
            state_id: 0x5A,
            status_flags: 0x0F,
            is_running: true,
            current_speed: 77,
            target_speed: 77,
            speed_param: 129,
            set_timer: 900,
            remaining_timer: 731,
            segment_distance: 42.5,
            total_distance: 1234.25,
            timestamp: 1_717_171_717,
            device_name: "EndlessPool".to_string(),
        }
    }

    #[test]
    fn test_telemetry_round_trip() {
        let status = sample_status();
        let bytes = encode_telemetry(&status);

        assert_eq!(bytes.len(), TELEMETRY_SIZE);
        assert_eq!(&bytes[..2], &MAGIC);
        assert_eq!(bytes[4], 0x21);
        assert_eq!(decode_telemetry(&bytes).unwrap(), status);

        let stopped = PoolStatus {
            is_running: false,
            status_flags: 0x48,
            ..status
        };
        let decoded = decode_telemetry(&encode_telemetry(&stopped)).unwrap();
        assert!(!decoded.is_running);
        assert_eq!(decoded.status_flags, 0x48);
    }

    #[test]
    fn test_telemetry_distances_rounded() {
        let status = PoolStatus {
            total_distance: 10.123_456,
            segment_distance: 0.004,
            ..sample_status()
        };
        let decoded = decode_telemetry(&encode_telemetry(&status)).unwrap();
        assert!((decoded.total_distance - 10.12).abs() < 1e-9);
        assert!(decoded.segment_distance.abs() < 1e-9);
    }

    #[test]
    fn test_telemetry_single_byte_corruption_rejected() {
        let bytes = encode_telemetry(&sample_status());

        for offset in 0..TELEMETRY_CRC_OFFSET {
            let mut corrupted = bytes.to_vec();
            corrupted[offset] ^= 0xFF;
            assert!(
                decode_telemetry(&corrupted).is_err(),
                "corruption at byte {offset} was accepted"
            );
        }
    }

    #[test]
    fn test_telemetry_bit_flip_rejected() {
        let bytes = encode_telemetry(&sample_status());

        for offset in MAGIC.len()..TELEMETRY_CRC_OFFSET {
            for bit in 0..8 {
                let mut corrupted = bytes.to_vec();
                corrupted[offset] ^= 1 << bit;
                assert!(matches!(
                    decode_telemetry(&corrupted),
                    Err(PoolError::ChecksumMismatch { .. })
                ));
            }
        }
    }

    #[test]
    fn test_telemetry_rejects_bad_frames() {
        let bytes = encode_telemetry(&sample_status());

        assert!(matches!(
            decode_telemetry(&bytes[..110]),
            Err(PoolError::InvalidLength {
                expected: 111,
                got: 110
            })
        ));
        assert!(matches!(
            decode_telemetry(&[]),
            Err(PoolError::InvalidLength { .. })
        ));

        let mut wrong_magic = bytes.to_vec();
        wrong_magic[1] = 0xF1;
        assert!(matches!(
            decode_telemetry(&wrong_magic),
            Err(PoolError::BadMagic([0x0A, 0xF1]))
        ));

        let command = encode_command(CommandKind::Start, 0);
        assert!(decode_telemetry(&command).is_err());
    }

    #[test]
    fn test_device_name_decoding() {
        let mut bytes = encode_telemetry(&sample_status()).to_vec();
        bytes[79..92].copy_from_slice(b"Pool\xFFA\0junk\0\0");
        let crc = crc32fast::hash(&bytes[..TELEMETRY_CRC_OFFSET]);
        bytes[TELEMETRY_CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());

        let status = decode_telemetry(&bytes).unwrap();
        assert_eq!(status.device_name, "Pool\u{FFFD}A");
    }

    #[test]
    fn test_command_layout() {
        let packet = CommandPacket {
            transaction_id: 0xAB,
            kind: CommandKind::SetTimer,
            parameter: 600,
            timestamp: 0x0102_0304,
        };
        let bytes = packet.to_bytes();

        assert_eq!(bytes.len(), COMMAND_SIZE);
        assert_eq!(&bytes[..2], &[0x0A, 0xF0]);
        assert_eq!(bytes[2], 0xAB);
        assert_eq!(bytes[3], 0x25);
        assert_eq!(&bytes[4..6], &600u16.to_le_bytes());
        assert!(bytes[6..32].iter().all(|&b| b == 0));
        assert_eq!(&bytes[32..36], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[36..40], &412u32.to_le_bytes());
        let crc = crc32fast::hash(&bytes[..40]);
        assert_eq!(&bytes[40..44], &crc.to_le_bytes());

        assert_eq!(CommandPacket::from_bytes(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_encode_command_fields() {
        let before = unix_now();
        let bytes = encode_command(CommandKind::SetSpeed, 120);
        let packet = CommandPacket::from_bytes(&bytes).unwrap();

        assert_eq!(packet.kind, CommandKind::SetSpeed);
        assert_eq!(packet.parameter, 120);
        assert!(packet.timestamp >= before);
        assert!(packet.timestamp - before <= 2);
    }

    #[test]
    fn test_transaction_ids_vary() {
        let ids: std::collections::HashSet<u8> = (0..64)
            .map(|_| encode_command(CommandKind::Stop, 0)[2])
            .collect();
        assert!(ids.len() > 1);
    }

    #[test]
    fn test_command_parse_rejects_bad_packets() {
        let bytes = CommandRequest::start().to_packet();

        let mut corrupted = bytes.to_vec();
        corrupted[5] ^= 0x01;
        assert!(matches!(
            CommandPacket::from_bytes(&corrupted),
            Err(PoolError::ChecksumMismatch { .. })
        ));

        let mut unknown = bytes.to_vec();
        unknown[3] = 0x99;
        let crc = crc32fast::hash(&unknown[..COMMAND_CRC_OFFSET]);
        unknown[COMMAND_CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            CommandPacket::from_bytes(&unknown),
            Err(PoolError::UnknownCommand(0x99))
        ));

        let mut constant = bytes.to_vec();
        constant[36] = 0;
        let crc = crc32fast::hash(&constant[..COMMAND_CRC_OFFSET]);
        constant[COMMAND_CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            CommandPacket::from_bytes(&constant),
            Err(PoolError::BadConstant(_))
        ));
    }

    #[test]
    fn test_command_requests() {
        assert_eq!(CommandRequest::start().kind, CommandKind::Start);
        assert_eq!(CommandRequest::stop().parameter, 0);
        assert_eq!(CommandRequest::set_speed(95).parameter, 95);
        assert_eq!(CommandRequest::set_timer(1200).kind, CommandKind::SetTimer);
        assert_eq!(CommandKind::from_u8(0x21), Some(CommandKind::Stop));
        assert_eq!(CommandKind::from_u8(0x00), None);
    }
}

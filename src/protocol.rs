use crate::{
    error::{Result, WalkingPadError},
    types::{RawStatus, WalkingPadMode},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// First byte of every app-to-device command
pub const COMMAND_HEADER: u8 = 0xF7;

/// First byte of every device-to-app message
pub const RESPONSE_HEADER: u8 = 0xF8;

/// Last byte of every frame
pub const FRAME_TRAILER: u8 = 0xFD;

/// Message class carrying live status and control commands
pub const CLASS_STATUS: u8 = 0xA2;

/// Message class carrying stored session records
pub const CLASS_RECORD: u8 = 0xA7;

/// Minimum length of a status frame
pub const STATUS_FRAME_MIN_LEN: usize = 14;

/// Command codes of the `0xA2` class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    /// Request a status frame
    AskStats = 0x00,
    /// Set belt speed in tenths of km/h
    SetSpeed = 0x01,
    /// Switch operating mode
    SwitchMode = 0x02,
    /// Start the belt
    StartBelt = 0x04,
}

/// A single app-to-device command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Command code
    pub code: CommandCode,
    /// Single byte argument
    pub value: u8,
}

impl Command {
    /// Request the current status
    #[must_use]
    pub const fn ask_stats() -> Self {
        Self {
            code: CommandCode::AskStats,
            value: 0,
        }
    }

    /// Set the belt speed in tenths of km/h
    #[must_use]
    pub const fn set_speed(tenths: u8) -> Self {
        Self {
            code: CommandCode::SetSpeed,
            value: tenths,
        }
    }

    /// Start the belt
    #[must_use]
    pub const fn start_belt() -> Self {
        Self {
            code: CommandCode::StartBelt,
            value: 1,
        }
    }

    /// Stop the belt, which the controller expresses as speed zero
    #[must_use]
    pub const fn stop_belt() -> Self {
        Self::set_speed(0)
    }

    /// Switch the operating mode
    #[must_use]
    pub const fn switch_mode(mode: WalkingPadMode) -> Self {
        Self {
            code: CommandCode::SwitchMode,
            value: mode as u8,
        }
    }

    /// Serialize command to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6);

        buf.put_u8(COMMAND_HEADER);
        buf.put_u8(CLASS_STATUS);
        buf.put_u8(self.code as u8);
        buf.put_u8(self.value);
        buf.put_u8(0);
        buf.put_u8(FRAME_TRAILER);

        let crc = checksum(&buf);
        let crc_index = buf.len() - 2;
        buf[crc_index] = crc;

        buf.freeze()
    }
}

/// Checksum over everything between the header and the checksum byte
#[must_use]
pub fn checksum(frame: &[u8]) -> u8 {
    if frame.len() < 3 {
        return 0;
    }
    frame[1..frame.len() - 2]
        .iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

/// Device-to-app message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Live status frame
    Status(RawStatus),
    /// Stored session record, not interpreted
    Record,
    /// Frame of a class this crate does not use
    Other(u8),
}

/// Read a 24-bit big-endian counter
fn get_u24(buf: &mut &[u8]) -> u32 {
    let high = u32::from(buf.get_u8());
    let mid = u32::from(buf.get_u8());
    let low = u32::from(buf.get_u8());
    (high << 16) | (mid << 8) | low
}

/// Parse a notification received from the device
///
/// Status frame layout:
/// - Byte 0: `0xF8`
/// - Byte 1: `0xA2`
/// - Byte 2: belt state
/// - Byte 3: speed in tenths of km/h
/// - Byte 4: mode
/// - Bytes 5-7: running time in seconds (24-bit big-endian)
/// - Bytes 8-10: distance counter (24-bit big-endian)
/// - Bytes 11-13: step count (24-bit big-endian)
///
/// The receive timestamp is not part of the frame; `rtime` is set by the caller.
///
/// # Errors
///
/// Returns [`WalkingPadError::ParseError`] for frames that are too short or
/// do not start with the response header.
pub fn parse_notification(data: &[u8], rtime: u64) -> Result<Notification> {
    if data.len() < 2 {
        return Err(WalkingPadError::ParseError(format!(
            "Frame too short: {} bytes",
            data.len()
        )));
    }

    let mut buf = data;
    let header = buf.get_u8();
    if header != RESPONSE_HEADER {
        return Err(WalkingPadError::ParseError(format!(
            "Unexpected frame header: {header:02X}"
        )));
    }

    match buf.get_u8() {
        CLASS_STATUS => {
            if data.len() < STATUS_FRAME_MIN_LEN {
                return Err(WalkingPadError::ParseError(format!(
                    "Status frame too short: {} bytes, expected {}",
                    data.len(),
                    STATUS_FRAME_MIN_LEN
                )));
            }

            let belt_state = buf.get_u8();
            let speed_tenths = buf.get_u8();
            let manual_mode = buf.get_u8();
            let time = get_u24(&mut buf);
            let distance_raw = get_u24(&mut buf);
            let steps = get_u24(&mut buf);

            Ok(Notification::Status(RawStatus {
                belt_state,
                speed_tenths,
                manual_mode,
                distance_raw,
                time,
                steps,
                rtime,
            }))
        }
        CLASS_RECORD => Ok(Notification::Record),
        other => Ok(Notification::Other(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_frame() -> Vec<u8> {
        let mut frame = vec![
            0xF8, 0xA2, // header, class
            0x01, // active
            0x23, // 3.5 km/h
            0x01, // manual
            0x00, 0x02, 0x58, // 600 s
            0x00, 0x00, 0x2A, // distance 42
            0x00, 0x03, 0x2C, // 812 steps
            0x00, 0x00, 0x00, // app speed, padding, button
            0x00, // checksum
            FRAME_TRAILER,
        ];
        let crc = checksum(&frame);
        let crc_index = frame.len() - 2;
        frame[crc_index] = crc;
        frame
    }

    #[test]
    fn test_ask_stats_bytes() {
        let bytes = Command::ask_stats().to_bytes();
        assert_eq!(&bytes[..], &[0xF7, 0xA2, 0x00, 0x00, 0xA2, 0xFD]);
    }

    #[test]
    fn test_speed_command_bytes() {
        let bytes = Command::set_speed(35).to_bytes();
        assert_eq!(&bytes[..], &[0xF7, 0xA2, 0x01, 35, 0xA2 + 0x01 + 35, 0xFD]);
    }

    #[test]
    fn test_start_and_stop_commands() {
        assert_eq!(
            &Command::start_belt().to_bytes()[..],
            &[0xF7, 0xA2, 0x04, 0x01, 0xA7, 0xFD]
        );
        assert_eq!(Command::stop_belt(), Command::set_speed(0));
    }

    #[test]
    fn test_switch_mode_command() {
        let standby = Command::switch_mode(WalkingPadMode::Standby);
        assert_eq!(standby.code, CommandCode::SwitchMode);
        assert_eq!(standby.value, 2);
        assert_eq!(&standby.to_bytes()[..], &[0xF7, 0xA2, 0x02, 0x02, 0xA6, 0xFD]);
    }

    #[test]
    fn test_checksum_wraps() {
        let frame = [0xF7, 0xFF, 0xFF, 0x03, 0x00, 0xFD];
        assert_eq!(checksum(&frame), 0x01);
    }

    #[test]
    fn test_parse_status_frame() {
        let parsed = parse_notification(&status_frame(), 1_234).unwrap();
        let Notification::Status(raw) = parsed else {
            panic!("expected a status frame");
        };

        assert_eq!(raw.belt_state, 1);
        assert_eq!(raw.speed_tenths, 35);
        assert_eq!(raw.manual_mode, 1);
        assert_eq!(raw.time, 600);
        assert_eq!(raw.distance_raw, 42);
        assert_eq!(raw.steps, 812);
        assert_eq!(raw.rtime, 1_234);
    }

    #[test]
    fn test_parse_record_frame() {
        let frame = [0xF8, 0xA7, 0x00, 0x00, 0xA7, 0xFD];
        assert_eq!(parse_notification(&frame, 0).unwrap(), Notification::Record);
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        assert!(parse_notification(&[0xF8], 0).is_err());
        assert!(parse_notification(&[0xF7, 0xA2, 0x00, 0x00, 0xA2, 0xFD], 0).is_err());
        assert!(parse_notification(&status_frame()[..10], 0).is_err());
    }
}

//! Leybold turbovac telegram codec (spec.md §4.3) — the hardest piece of
//! this system: a fixed 24-byte frame with packed control-word bits and an
//! XOR checksum, driven over a raw serial line at 19200 8N1.
//!
//! Everything here is a pure transform over `[u8; 24]`; the worker owns the
//! serial port and the 100 ms stop-sequence timing.

const FRAME_LEN: usize = 24;
const START_BYTE: u8 = 0x02;
const LENGTH_BYTE: u8 = 0x16;

const BIT_START: u16 = 1 << 0;
const BIT_PZD2: u16 = 1 << 6;
const BIT_EPD: u16 = 1 << 10;

/// The three control-word bits this rig actually uses (spec.md §4.3); every
/// other bit stays zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord {
    pub start_bit: bool,
    pub pzd2: bool,
    pub epd: bool,
}

impl ControlWord {
    /// The encoding default: running drives both `start_bit` and `PZD2`,
    /// and `epd` defaults to enabled.
    pub fn for_running(running: bool) -> Self {
        Self {
            start_bit: running,
            pzd2: running,
            epd: true,
        }
    }

    fn to_bits(self) -> u16 {
        let mut bits = 0u16;
        if self.start_bit {
            bits |= BIT_START;
        }
        if self.pzd2 {
            bits |= BIT_PZD2;
        }
        if self.epd {
            bits |= BIT_EPD;
        }
        bits
    }

    fn from_bits(bits: u16) -> Self {
        Self {
            start_bit: bits & BIT_START != 0,
            pzd2: bits & BIT_PZD2 != 0,
            epd: bits & BIT_EPD != 0,
        }
    }
}

/// A frame decoded off the wire (spec.md §4.3 decoding rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedTelegram {
    pub start_bit: bool,
    pub pzd2: bool,
    pub epd: bool,
    /// `[13..15)`: acknowledged setpoint when `pzd2`, measured frequency otherwise.
    pub payload: u16,
    pub freq_conv_temp_c: u8,
    pub bearing_temp_c: u8,
    pub checksum_ok: bool,
}

fn checksum(frame: &[u8; FRAME_LEN]) -> u8 {
    frame[0..23].iter().fold(0u8, |acc, b| acc ^ b)
}

/// Builds and checksums a telegram. `payload`, when present, is written to
/// `[13..15)` regardless of the control word's own defaults — callers that
/// want the "only if running" default (spec.md §4.3) pass `None` and let
/// the worker apply that rule before calling in.
fn build_telegram(control: ControlWord, payload: Option<u16>, overrides: &[(usize, u8)]) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = START_BYTE;
    frame[1] = LENGTH_BYTE;
    frame[11..13].copy_from_slice(&control.to_bits().to_be_bytes());
    if let Some(value) = payload {
        frame[13..15].copy_from_slice(&value.to_be_bytes());
    }
    for &(offset, value) in overrides {
        frame[offset] = value;
    }
    frame[23] = checksum(&frame);
    frame
}

/// Decodes a received telegram. The checksum is reported but never
/// enforced — the device is known to send frames the original system never
/// validated (spec.md §9 open question); callers should log a mismatch at
/// debug level and use the frame anyway.
pub fn decode_telegram(frame: &[u8; FRAME_LEN]) -> DecodedTelegram {
    let control = ControlWord::from_bits(u16::from_be_bytes([frame[11], frame[12]]));
    let payload = u16::from_be_bytes([frame[13], frame[14]]);
    DecodedTelegram {
        start_bit: control.start_bit,
        pzd2: control.pzd2,
        epd: control.epd,
        payload,
        freq_conv_temp_c: frame[15],
        bearing_temp_c: frame[20],
        checksum_ok: frame[23] == checksum(frame),
    }
}

/// Clamps a requested setpoint to the turbine's valid range, `[0, 1000]` Hz.
pub fn clamp_setpoint(hz: i32) -> u16 {
    hz.clamp(0, 1000) as u16
}

/// `control`: default-encoded telegram, requesting the control handshake.
pub fn encode_control(running: bool, setpoint_hz: u16) -> [u8; FRAME_LEN] {
    let payload = running.then_some(setpoint_hz);
    build_telegram(ControlWord::for_running(running), payload, &[])
}

/// `start`: `start_bit=1, PZD2=1, setpoint=cur_setpoint`.
pub fn encode_start(setpoint_hz: u16) -> [u8; FRAME_LEN] {
    let control = ControlWord {
        start_bit: true,
        pzd2: true,
        epd: true,
    };
    build_telegram(control, Some(setpoint_hz), &[])
}

/// `stop`, first of the two 100 ms-apart telegrams: `start=0, PZD2=0, setpoint=0`.
pub fn encode_stop_first() -> [u8; FRAME_LEN] {
    let control = ControlWord {
        start_bit: false,
        pzd2: false,
        epd: true,
    };
    build_telegram(control, Some(0), &[])
}

/// `stop`, second telegram: identical save `epd=0`.
pub fn encode_stop_second() -> [u8; FRAME_LEN] {
    let control = ControlWord {
        start_bit: false,
        pzd2: false,
        epd: false,
    };
    build_telegram(control, Some(0), &[])
}

/// `setpoint N`: payload is placed unconditionally, overriding the
/// "only if running" default.
pub fn encode_setpoint(running: bool, setpoint_hz: u16) -> [u8; FRAME_LEN] {
    build_telegram(ControlWord::for_running(running), Some(setpoint_hz), &[])
}

/// `read_temp`: default telegram with the byte overrides that request a
/// temperature frame from the converter.
pub fn encode_read_temp(running: bool, setpoint_hz: u16) -> [u8; FRAME_LEN] {
    let payload = running.then_some(setpoint_hz);
    build_telegram(ControlWord::for_running(running), payload, &[(3, 0x10), (4, 0x01)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegrams_are_24_bytes_with_correct_header_and_checksum() {
        let frame = encode_start(800);
        assert_eq!(frame.len(), 24);
        assert_eq!(frame[0], 0x02);
        assert_eq!(frame[1], 0x16);
        assert_eq!(frame[23], checksum(&frame));
    }

    #[test]
    fn start_matches_worked_example() {
        let frame = encode_start(800);
        let control = u16::from_be_bytes([frame[11], frame[12]]);
        assert_eq!(control, 0x0441);
        let payload = u16::from_be_bytes([frame[13], frame[14]]);
        assert_eq!(payload, 0x0320);
    }

    #[test]
    fn stop_sequence_matches_worked_example() {
        let first = encode_stop_first();
        let second = encode_stop_second();
        assert_eq!(u16::from_be_bytes([first[11], first[12]]), 0x0400);
        assert_eq!(u16::from_be_bytes([second[11], second[12]]), 0x0000);
        assert_eq!(u16::from_be_bytes([first[13], first[14]]), 0);
        assert_eq!(u16::from_be_bytes([second[13], second[14]]), 0);
    }

    #[test]
    fn read_temp_sets_override_bytes() {
        let frame = encode_read_temp(true, 500);
        assert_eq!(frame[3], 0x10);
        assert_eq!(frame[4], 0x01);
    }

    #[test]
    fn decode_round_trips_control_word_and_payload() {
        let frame = encode_start(640);
        let decoded = decode_telegram(&frame);
        assert!(decoded.start_bit);
        assert!(decoded.pzd2);
        assert!(decoded.epd);
        assert_eq!(decoded.payload, 640);
        assert!(decoded.checksum_ok);
    }

    #[test]
    fn decode_reports_measured_frequency_when_pzd2_clear() {
        let control = ControlWord {
            start_bit: true,
            pzd2: false,
            epd: true,
        };
        let frame = build_telegram(control, Some(612), &[]);
        let decoded = decode_telegram(&frame);
        assert!(!decoded.pzd2);
        assert_eq!(decoded.payload, 612);
    }

    #[test]
    fn decode_reads_temperature_bytes() {
        let mut frame = encode_control(false, 0);
        frame[15] = 42;
        frame[20] = 31;
        frame[23] = checksum(&frame);
        let decoded = decode_telegram(&frame);
        assert_eq!(decoded.freq_conv_temp_c, 42);
        assert_eq!(decoded.bearing_temp_c, 31);
    }

    #[test]
    fn decode_flags_checksum_mismatch_without_rejecting() {
        let mut frame = encode_start(800);
        frame[23] ^= 0xFF;
        let decoded = decode_telegram(&frame);
        assert!(!decoded.checksum_ok);
        assert_eq!(decoded.payload, 0x0320);
    }

    #[test]
    fn clamp_setpoint_bounds_to_rig_range() {
        assert_eq!(clamp_setpoint(-50), 0);
        assert_eq!(clamp_setpoint(1500), 1000);
        assert_eq!(clamp_setpoint(500), 500);
    }
}

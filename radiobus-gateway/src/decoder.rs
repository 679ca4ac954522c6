//! Cayenne LPP telemetry payload decoder.
//!
//! A payload is a sequence of `[channel, type, data...]` records. Each record
//! contributes one value per axis, in payload order. Channel numbers are not
//! used for placement: a sensor's register slot is its position in the
//! payload.

/// Index of the channel that is always reported as a non-negative value.
pub const ABSOLUTE_VALUE_INDEX: usize = 7;

/// Cayenne LPP data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LppType {
    DigitalInput = 0,
    DigitalOutput = 1,
    AnalogInput = 2,
    AnalogOutput = 3,
    Illuminance = 101,
    Presence = 102,
    Temperature = 103,
    Humidity = 104,
    Accelerometer = 113,
    Barometer = 115,
    Gyrometer = 134,
    Gps = 136,
}

impl LppType {
    /// Parse a type from its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::DigitalInput),
            1 => Some(Self::DigitalOutput),
            2 => Some(Self::AnalogInput),
            3 => Some(Self::AnalogOutput),
            101 => Some(Self::Illuminance),
            102 => Some(Self::Presence),
            103 => Some(Self::Temperature),
            104 => Some(Self::Humidity),
            113 => Some(Self::Accelerometer),
            115 => Some(Self::Barometer),
            134 => Some(Self::Gyrometer),
            136 => Some(Self::Gps),
            _ => None,
        }
    }

    /// Get the string name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DigitalInput => "digital_input",
            Self::DigitalOutput => "digital_output",
            Self::AnalogInput => "analog_input",
            Self::AnalogOutput => "analog_output",
            Self::Illuminance => "illuminance",
            Self::Presence => "presence",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Accelerometer => "accelerometer",
            Self::Barometer => "barometer",
            Self::Gyrometer => "gyrometer",
            Self::Gps => "gps",
        }
    }

    /// Data size in bytes (excluding channel and type).
    pub fn size(&self) -> usize {
        match self {
            Self::DigitalInput | Self::DigitalOutput | Self::Presence | Self::Humidity => 1,
            Self::AnalogInput
            | Self::AnalogOutput
            | Self::Illuminance
            | Self::Temperature
            | Self::Barometer => 2,
            Self::Accelerometer | Self::Gyrometer => 6,
            Self::Gps => 9,
        }
    }

    /// Decode the data bytes of one record, appending one value per axis.
    fn decode_into(&self, data: &[u8], out: &mut Vec<f64>) {
        match self {
            Self::DigitalInput | Self::DigitalOutput | Self::Presence => {
                out.push(f64::from(data[0]));
            }
            Self::Humidity => out.push(f64::from(data[0]) * 0.5),
            Self::AnalogInput | Self::AnalogOutput => out.push(signed(&data[..2]) * 0.01),
            Self::Illuminance => out.push(unsigned(&data[..2])),
            Self::Temperature => out.push(signed(&data[..2]) * 0.1),
            Self::Barometer => out.push(unsigned(&data[..2]) * 0.1),
            Self::Accelerometer => {
                out.extend(data.chunks(2).map(|axis| signed(axis) * 0.001));
            }
            Self::Gyrometer => {
                out.extend(data.chunks(2).map(|axis| signed(axis) * 0.01));
            }
            Self::Gps => {
                out.push(signed(&data[0..3]) * 0.0001);
                out.push(signed(&data[3..6]) * 0.0001);
                out.push(signed(&data[6..9]) * 0.01);
            }
        }
    }
}

/// Payload decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("unknown data type {code} on channel {channel} at byte {offset}")]
    UnknownType { channel: u8, code: u8, offset: usize },
    #[error("truncated {kind} record at byte {offset}: need {needed} bytes, have {available}")]
    Truncated {
        kind: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// Big-endian unsigned integer of up to 4 bytes.
fn unsigned(bytes: &[u8]) -> f64 {
    let raw = bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
    f64::from(raw)
}

/// Big-endian two's-complement integer of up to 4 bytes.
fn signed(bytes: &[u8]) -> f64 {
    let bits = (bytes.len() * 8) as u32;
    let raw = bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
    let shift = 32 - bits;
    f64::from(((raw << shift) as i32) >> shift)
}

/// Decode a Cayenne LPP payload into an ordered list of sensor values.
///
/// The value at [`ABSOLUTE_VALUE_INDEX`] is replaced by its absolute value.
pub fn decode(payload: &[u8]) -> Result<Vec<f64>, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut values = Vec::new();
    let mut offset = 0;

    while offset < payload.len() {
        let remaining = &payload[offset..];
        if remaining.len() < 2 {
            return Err(DecodeError::Truncated {
                kind: "header",
                offset,
                needed: 2,
                available: remaining.len(),
            });
        }

        let channel = remaining[0];
        let code = remaining[1];
        let lpp_type = LppType::from_code(code).ok_or(DecodeError::UnknownType {
            channel,
            code,
            offset,
        })?;

        let data = &remaining[2..];
        if data.len() < lpp_type.size() {
            return Err(DecodeError::Truncated {
                kind: lpp_type.as_str(),
                offset,
                needed: lpp_type.size(),
                available: data.len(),
            });
        }

        lpp_type.decode_into(&data[..lpp_type.size()], &mut values);
        offset += 2 + lpp_type.size();
    }

    if let Some(value) = values.get_mut(ABSOLUTE_VALUE_INDEX) {
        *value = value.abs();
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test frame transmitted by the field dummy-data firmware.
    const FIRMWARE_FRAME: [u8; 36] = [
        10, 115, 0, 195, 11, 103, 0, 195, 12, 115, 0, 195, 13, 103, 0, 195, 0, 115, 0, 0, 1, 115,
        0, 0, 2, 115, 0, 0, 0, 103, 206, 16, 9, 115, 4, 196,
    ];

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_firmware_frame() {
        let values = decode(&FIRMWARE_FRAME).unwrap();
        assert_eq!(values.len(), 9);

        assert!(approx(values[0], 19.5)); // barometer 195 * 0.1
        assert!(approx(values[1], 19.5)); // temperature 195 * 0.1
        assert!(approx(values[4], 0.0));
        // 0xCE10 = -12784 -> -1278.4, reported as absolute value
        assert!(approx(values[7], 1278.4));
        assert!(approx(values[8], 122.0));
    }

    #[test]
    fn test_sign_correction_only_touches_index_seven() {
        // Nine temperature records, all negative (-1.0).
        let mut payload = Vec::new();
        for channel in 0..9u8 {
            payload.extend_from_slice(&[channel, 103, 0xFF, 0xF6]);
        }

        let values = decode(&payload).unwrap();
        for (i, value) in values.iter().enumerate() {
            if i == ABSOLUTE_VALUE_INDEX {
                assert!(approx(*value, 1.0));
            } else {
                assert!(approx(*value, -1.0), "index {i} was {value}");
            }
        }
    }

    #[test]
    fn test_short_payload_is_not_corrected() {
        let values = decode(&[1, 103, 0xFF, 0xF6]).unwrap();
        assert_eq!(values.len(), 1);
        assert!(approx(values[0], -1.0));
    }

    #[test]
    fn test_multi_axis_types() {
        // Accelerometer: x=1.000 y=-1.000 z=0.500
        let payload = [3, 113, 0x03, 0xE8, 0xFC, 0x18, 0x01, 0xF4];
        let values = decode(&payload).unwrap();
        assert_eq!(values.len(), 3);
        assert!(approx(values[0], 1.0));
        assert!(approx(values[1], -1.0));
        assert!(approx(values[2], 0.5));

        // GPS: lat 42.3519, lon -87.9094, alt 10.00
        let payload = [1, 136, 0x06, 0x76, 0x5F, 0xF2, 0x96, 0x0A, 0x00, 0x03, 0xE8];
        let values = decode(&payload).unwrap();
        assert!(approx(values[0], 42.3519));
        assert!(approx(values[1], -87.9094));
        assert!(approx(values[2], 10.0));
    }

    #[test]
    fn test_humidity_and_digital() {
        let values = decode(&[5, 104, 0x61, 6, 0, 1]).unwrap();
        assert!(approx(values[0], 48.5));
        assert!(approx(values[1], 1.0));
    }

    #[test]
    fn test_errors() {
        assert_eq!(decode(&[]), Err(DecodeError::Empty));
        assert!(matches!(
            decode(&[1, 200, 0, 0]),
            Err(DecodeError::UnknownType { code: 200, .. })
        ));
        assert!(matches!(
            decode(&[1, 103, 0]),
            Err(DecodeError::Truncated { kind: "temperature", needed: 2, available: 1, .. })
        ));
        assert!(matches!(
            decode(&[1, 103, 0, 10, 2]),
            Err(DecodeError::Truncated { kind: "header", offset: 4, .. })
        ));
    }
}

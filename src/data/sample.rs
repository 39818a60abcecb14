//! Motion samples and session metadata, with their fixed-size storage records.
//!
//! Both records are little-endian and carry no version field or record markers;
//! readers split the data stream into `SAMPLE_SIZE` chunks.
//!
//! ```text
//! Sample (52 bytes)
//!   timestamp_ms: u32
//!   accel:        3 x { integer: i32, micro: i32 }
//!   gyro:         3 x { integer: i32, micro: i32 }
//!
//! RecordMeta (8 bytes)
//!   total_size:   u32
//!   sample_count: u16
//!   reserved:     [u8; 2]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, RecorderError};

/// Encoded size of one [`Sample`] in bytes.
pub const SAMPLE_SIZE: usize = 4 + 6 * SensorValue::SIZE;

/// Encoded size of one [`RecordMeta`] in bytes.
pub const META_SIZE: usize = 8;

const MICROS_PER_UNIT: i64 = 1_000_000;

/// Fixed-point reading as delivered by the sensor driver.
///
/// The value is `integer + micro / 1_000_000`. Both parts carry the sign, so
/// -1.5 is `{ integer: -1, micro: -500_000 }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorValue {
    /// Integer part
    pub integer: i32,
    /// Fractional part in millionths
    pub micro: i32,
}

impl SensorValue {
    /// Encoded size in bytes.
    pub const SIZE: usize = 8;

    /// Builds a value from its two parts.
    pub const fn new(integer: i32, micro: i32) -> Self {
        Self { integer, micro }
    }

    /// Converts a floating-point reading, rounding to the nearest millionth.
    pub fn from_f64(value: f64) -> Self {
        let total = (value * MICROS_PER_UNIT as f64).round() as i64;
        Self {
            integer: (total / MICROS_PER_UNIT) as i32,
            micro: (total % MICROS_PER_UNIT) as i32,
        }
    }

    /// Floating-point view of the reading.
    pub fn to_f64(self) -> f64 {
        f64::from(self.integer) + f64::from(self.micro) / MICROS_PER_UNIT as f64
    }

    fn put(self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.integer);
        buf.put_i32_le(self.micro);
    }

    fn get(buf: &mut impl Buf) -> Self {
        Self {
            integer: buf.get_i32_le(),
            micro: buf.get_i32_le(),
        }
    }
}

/// One timestamped motion reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the session started
    pub timestamp_ms: u32,
    /// Linear acceleration X/Y/Z in m/s²
    pub accel: [SensorValue; 3],
    /// Angular rate X/Y/Z in rad/s
    pub gyro: [SensorValue; 3],
}

impl Sample {
    /// Appends the storage record for this sample to `buf`.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.timestamp_ms);
        for value in self.accel.iter().chain(self.gyro.iter()) {
            value.put(buf);
        }
    }

    /// Storage record for this sample.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SAMPLE_SIZE);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decodes one record from the front of `bytes`.
    pub fn decode(mut bytes: &[u8]) -> AppResult<Self> {
        if bytes.len() < SAMPLE_SIZE {
            return Err(truncated("sample", bytes.len(), SAMPLE_SIZE));
        }
        let timestamp_ms = bytes.get_u32_le();
        let accel = [
            SensorValue::get(&mut bytes),
            SensorValue::get(&mut bytes),
            SensorValue::get(&mut bytes),
        ];
        let gyro = [
            SensorValue::get(&mut bytes),
            SensorValue::get(&mut bytes),
            SensorValue::get(&mut bytes),
        ];
        Ok(Self {
            timestamp_ms,
            accel,
            gyro,
        })
    }

    /// Decodes every complete record in `bytes`, ignoring a trailing partial one.
    pub fn decode_all(bytes: &[u8]) -> Vec<Self> {
        bytes
            .chunks_exact(SAMPLE_SIZE)
            .filter_map(|chunk| Self::decode(chunk).ok())
            .collect()
    }
}

/// Summary of one recording session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Bytes of sample data recorded
    pub total_size: u32,
    /// Number of samples recorded
    pub sample_count: u16,
}

impl RecordMeta {
    /// Metadata for `sample_count` samples, keeping `total_size` consistent.
    pub fn for_samples(sample_count: u16) -> Self {
        Self {
            total_size: u32::from(sample_count) * SAMPLE_SIZE as u32,
            sample_count,
        }
    }

    /// Whether `total_size` matches `sample_count` whole samples.
    pub fn is_consistent(&self) -> bool {
        u64::from(self.total_size) == u64::from(self.sample_count) * SAMPLE_SIZE as u64
    }

    /// Storage and notification record for this metadata.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(META_SIZE);
        buf.put_u32_le(self.total_size);
        buf.put_u16_le(self.sample_count);
        buf.put_bytes(0, 2);
        buf.freeze()
    }

    /// Decodes a metadata record.
    pub fn decode(mut bytes: &[u8]) -> AppResult<Self> {
        if bytes.len() < META_SIZE {
            return Err(truncated("record meta", bytes.len(), META_SIZE));
        }
        let total_size = bytes.get_u32_le();
        let sample_count = bytes.get_u16_le();
        Ok(Self {
            total_size,
            sample_count,
        })
    }
}

fn truncated(what: &str, got: usize, expected: usize) -> RecorderError {
    RecorderError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("truncated {what}: {got} of {expected} bytes"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: u32) -> Sample {
        Sample {
            timestamp_ms: ts,
            accel: [
                SensorValue::new(0, 125_000),
                SensorValue::new(-1, -500_000),
                SensorValue::new(9, 810_000),
            ],
            gyro: [
                SensorValue::new(0, -3_000),
                SensorValue::new(0, 0),
                SensorValue::new(2, 1),
            ],
        }
    }

    #[test]
    fn test_sample_record_layout() {
        assert_eq!(SAMPLE_SIZE, 52);

        let bytes = sample(0x0102_0304).encode();
        assert_eq!(bytes.len(), SAMPLE_SIZE);
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
        // accel[1].integer = -1
        assert_eq!(&bytes[12..16], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(Sample::decode(&bytes).unwrap(), sample(0x0102_0304));
    }

    #[test]
    fn test_decode_rejects_short_record() {
        let bytes = sample(1).encode();
        assert!(Sample::decode(&bytes[..SAMPLE_SIZE - 1]).is_err());
        assert!(RecordMeta::decode(&[0u8; 7]).is_err());
    }

    #[test]
    fn test_decode_all_skips_partial_tail() {
        let mut buf = BytesMut::new();
        for ts in 0..3 {
            sample(ts).encode_into(&mut buf);
        }
        buf.put_slice(&[0xAA; 10]);

        let decoded = Sample::decode_all(&buf);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[2].timestamp_ms, 2);
    }

    #[test]
    fn test_sensor_value_conversion() {
        assert_eq!(SensorValue::from_f64(-1.5), SensorValue::new(-1, -500_000));
        assert_eq!(SensorValue::from_f64(9.80665), SensorValue::new(9, 806_650));
        assert_eq!(SensorValue::from_f64(0.9999999), SensorValue::new(1, 0));
        assert!((SensorValue::new(-1, -250_000).to_f64() + 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_record_meta_layout() {
        let meta = RecordMeta::for_samples(250);
        assert_eq!(meta.total_size, 250 * 52);
        assert!(meta.is_consistent());

        let bytes = meta.encode();
        assert_eq!(bytes.len(), META_SIZE);
        assert_eq!(&bytes[..], &[0xC8, 0x32, 0x00, 0x00, 0xFA, 0x00, 0x00, 0x00]);
        assert_eq!(RecordMeta::decode(&bytes).unwrap(), meta);
    }

    #[test]
    fn test_inconsistent_meta_detected() {
        let meta = RecordMeta {
            total_size: 100,
            sample_count: 2,
        };
        assert!(!meta.is_consistent());
    }
}

//! # Sensor Packet Module
//!
//! Turns raw datagram payloads into typed samples.
//!
//! ## Wire Formats
//! One UTF-8 datagram carries one sample. The schema is fixed per deployment:
//! - `GSR:<float>`: single skin conductance/resistance reading
//! - `<float>,<int>`: EDA value and raw inter-beat interval in ms
//! - `<float>,<float>,<float>`: three gyroscope axes
//!
//! Anything else is a `DecodeError`; the caller drops the packet and keeps going.

use crate::error::DecodeError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Instant;

const GSR_PREFIX: &str = "GSR:";

/// Payload schema configured for this deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorSchema {
    Gsr,
    #[default]
    EdaIbi,
    Gyro,
}

impl SensorSchema {
    /// Column names of the raw values, in log order
    pub fn value_columns(&self) -> &'static [&'static str] {
        match self {
            SensorSchema::Gsr => &["gsr"],
            SensorSchema::EdaIbi => &["eda_raw", "ibi_raw", "ibi_clean"],
            SensorSchema::Gyro => &["gyro_x", "gyro_y", "gyro_z"],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SensorSchema::Gsr => "GSR",
            SensorSchema::EdaIbi => "EDA + IBI",
            SensorSchema::Gyro => "Gyroscope",
        }
    }
}

/// Host receive time, captured once per datagram
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    /// For cadence and ordering
    pub mono: Instant,
    /// For the log
    pub wall: DateTime<Local>,
}

impl Timestamp {
    pub fn now() -> Self {
        Self {
            mono: Instant::now(),
            wall: Local::now(),
        }
    }

    /// Unix seconds with microsecond precision
    pub fn unix_seconds(&self) -> f64 {
        self.wall.timestamp_micros() as f64 / 1_000_000.0
    }

    /// Local wall time of day, e.g. `14:03:27.123456`
    pub fn time_of_day(&self) -> String {
        self.wall.format("%H:%M:%S%.6f").to_string()
    }
}

/// Channel values carried by one datagram
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Gsr(f64),
    EdaIbi { eda: f64, ibi_ms: u32 },
    Gyro { x: f64, y: f64, z: f64 },
}

impl Reading {
    /// Interval carried by this reading, if any
    pub fn ibi_ms(&self) -> Option<u32> {
        match self {
            Reading::EdaIbi { ibi_ms, .. } => Some(*ibi_ms),
            _ => None,
        }
    }

    /// Encode back into the wire text
    pub fn to_payload(&self) -> String {
        match self {
            Reading::Gsr(value) => format!("{}{}", GSR_PREFIX, value),
            Reading::EdaIbi { eda, ibi_ms } => format!("{},{}", eda, ibi_ms),
            Reading::Gyro { x, y, z } => format!("{},{},{}", x, y, z),
        }
    }
}

/// One decoded receive event. Only built from payloads that passed validation.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub received: Timestamp,
    pub reading: Reading,
}

/// Decode a raw payload against the deployment schema
pub fn decode(
    schema: SensorSchema,
    payload: &[u8],
    received: Timestamp,
) -> Result<Sample, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    let reading = parse_reading(schema, text.trim())?;
    Ok(Sample { received, reading })
}

fn parse_reading(schema: SensorSchema, text: &str) -> Result<Reading, DecodeError> {
    match schema {
        SensorSchema::Gsr => {
            let value = text.strip_prefix(GSR_PREFIX).ok_or(DecodeError::MissingPrefix)?;
            Ok(Reading::Gsr(parse_finite(value, "gsr")?))
        }
        SensorSchema::EdaIbi => {
            let fields = split_fields(text, 2)?;
            let eda = parse_finite(fields[0], "eda")?;
            let ibi: i64 = fields[1]
                .trim()
                .parse()
                .map_err(|_| DecodeError::InvalidNumber { field: "ibi" })?;
            let ibi_ms = u32::try_from(ibi)
                .ok()
                .filter(|v| *v > 0)
                .ok_or(DecodeError::OutOfRange { field: "ibi" })?;
            Ok(Reading::EdaIbi { eda, ibi_ms })
        }
        SensorSchema::Gyro => {
            let fields = split_fields(text, 3)?;
            Ok(Reading::Gyro {
                x: parse_finite(fields[0], "gyro_x")?,
                y: parse_finite(fields[1], "gyro_y")?,
                z: parse_finite(fields[2], "gyro_z")?,
            })
        }
    }
}

fn split_fields(text: &str, expected: usize) -> Result<Vec<&str>, DecodeError> {
    let fields: Vec<&str> = text.split(',').collect();
    if fields.len() != expected {
        return Err(DecodeError::FieldCount {
            expected,
            found: fields.len(),
        });
    }
    Ok(fields)
}

fn parse_finite(field: &str, name: &'static str) -> Result<f64, DecodeError> {
    let value: f64 = field
        .trim()
        .parse()
        .map_err(|_| DecodeError::InvalidNumber { field: name })?;
    if !value.is_finite() {
        return Err(DecodeError::OutOfRange { field: name });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_now(schema: SensorSchema, payload: &str) -> Result<Reading, DecodeError> {
        decode(schema, payload.as_bytes(), Timestamp::now()).map(|s| s.reading)
    }

    #[test]
    fn test_decode_gsr() {
        assert_eq!(decode_now(SensorSchema::Gsr, "GSR:512.0"), Ok(Reading::Gsr(512.0)));
        assert_eq!(decode_now(SensorSchema::Gsr, "GSR:3.25\r\n"), Ok(Reading::Gsr(3.25)));
    }

    #[test]
    fn test_decode_gsr_requires_prefix() {
        assert_eq!(decode_now(SensorSchema::Gsr, "512.0"), Err(DecodeError::MissingPrefix));
        assert_eq!(
            decode_now(SensorSchema::Gsr, "GSR:abc"),
            Err(DecodeError::InvalidNumber { field: "gsr" })
        );
    }

    #[test]
    fn test_decode_eda_ibi() {
        assert_eq!(
            decode_now(SensorSchema::EdaIbi, "300.0,800"),
            Ok(Reading::EdaIbi { eda: 300.0, ibi_ms: 800 })
        );
    }

    #[test]
    fn test_decode_eda_ibi_rejects_bad_packets() {
        assert_eq!(
            decode_now(SensorSchema::EdaIbi, "300.0"),
            Err(DecodeError::FieldCount { expected: 2, found: 1 })
        );
        assert_eq!(
            decode_now(SensorSchema::EdaIbi, "300.0,800,1"),
            Err(DecodeError::FieldCount { expected: 2, found: 3 })
        );
        assert_eq!(
            decode_now(SensorSchema::EdaIbi, "300.0,800.5"),
            Err(DecodeError::InvalidNumber { field: "ibi" })
        );
        assert_eq!(
            decode_now(SensorSchema::EdaIbi, "300.0,0"),
            Err(DecodeError::OutOfRange { field: "ibi" })
        );
        assert_eq!(
            decode_now(SensorSchema::EdaIbi, "300.0,-10"),
            Err(DecodeError::OutOfRange { field: "ibi" })
        );
        assert_eq!(
            decode_now(SensorSchema::EdaIbi, "NaN,800"),
            Err(DecodeError::OutOfRange { field: "eda" })
        );
    }

    #[test]
    fn test_decode_gyro() {
        assert_eq!(
            decode_now(SensorSchema::Gyro, "1.5,-2.25,0"),
            Ok(Reading::Gyro { x: 1.5, y: -2.25, z: 0.0 })
        );
        assert!(decode_now(SensorSchema::Gyro, "1.5,-2.25").is_err());
    }

    #[test]
    fn test_schema_is_not_auto_detected() {
        assert!(decode_now(SensorSchema::Gyro, "GSR:512.0").is_err());
        assert!(decode_now(SensorSchema::Gsr, "300.0,800").is_err());
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let result = decode(SensorSchema::Gsr, &[0xff, 0xfe, 0x00], Timestamp::now());
        assert_eq!(result.map(|s| s.reading), Err(DecodeError::NotUtf8));
    }

    #[test]
    fn test_interval_payload_reencodes_exactly() {
        for payload in ["300,1000", "0.1234567,812", "4095.5,65535", "-1.25e-3,1"] {
            let reading = decode_now(SensorSchema::EdaIbi, payload).unwrap();
            let again = decode_now(SensorSchema::EdaIbi, &reading.to_payload()).unwrap();
            assert_eq!(reading, again);
        }
    }

    #[test]
    fn test_timestamp_formats() {
        let ts = Timestamp::now();
        assert!(ts.unix_seconds() > 1_600_000_000.0);
        // HH:MM:SS.ffffff
        assert_eq!(ts.time_of_day().len(), 15);
    }
}

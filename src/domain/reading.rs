use chrono::{DateTime, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SERIES: &str = "flow";

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// One per-minute bucket as returned by the query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub datetime: String,
    pub value: ReadingValue,
}

/// The upstream emits usage both as a JSON number and as a decimal string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub series: String,
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Error, PartialEq)]
pub enum ReadingError {
    #[error("unrecognized reading datetime `{0}`")]
    InvalidDatetime(String),
    #[error("reading datetime `{0}` does not exist in the local time zone")]
    NonexistentLocalTime(String),
    #[error("reading value `{0}` is not a finite number")]
    InvalidValue(String),
}

#[derive(Debug, Clone)]
pub struct PointConverter<Tz: TimeZone> {
    series: String,
    zone: Tz,
}

impl<Tz: TimeZone> PointConverter<Tz> {
    pub fn new(series: impl Into<String>, zone: Tz) -> Self {
        Self {
            series: series.into(),
            zone,
        }
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn convert(&self, reading: &RawReading) -> Result<Point, ReadingError> {
        Ok(Point {
            series: self.series.clone(),
            value: parse_value(&reading.value)?,
            timestamp: self.parse_timestamp(&reading.datetime)?,
        })
    }

    /// Converts every reading or none: a single malformed bucket fails the batch.
    pub fn convert_all(&self, readings: &[RawReading]) -> Result<Vec<Point>, ReadingError> {
        readings.iter().map(|reading| self.convert(reading)).collect()
    }

    fn parse_timestamp(&self, raw: &str) -> Result<i64, ReadingError> {
        let trimmed = raw.trim();

        if let Ok(datetime) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(datetime.timestamp());
        }

        let naive = NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
            .ok_or_else(|| ReadingError::InvalidDatetime(raw.to_string()))?;

        self.zone
            .from_local_datetime(&naive)
            .earliest()
            .map(|datetime| datetime.timestamp())
            .ok_or_else(|| ReadingError::NonexistentLocalTime(raw.to_string()))
    }
}

fn parse_value(value: &ReadingValue) -> Result<f64, ReadingError> {
    let parsed = match value {
        ReadingValue::Number(number) => Some(*number),
        ReadingValue::Text(text) => text.trim().parse::<f64>().ok(),
    };

    match parsed {
        Some(number) if number.is_finite() => Ok(number),
        _ => Err(ReadingError::InvalidValue(match value {
            ReadingValue::Number(number) => number.to_string(),
            ReadingValue::Text(text) => text.clone(),
        })),
    }
}

//! Common Schema Primitives
//!
//! Normalized record types shared by every provider schema, plus the
//! lenient field coercions third-party payloads need.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

/// Offset between degrees Celsius and Kelvin
pub const KELVIN_OFFSET: f64 = 273.15;

/// Converts a Celsius reading to Kelvin, the single stored unit
pub fn celsius_to_kelvin(celsius: f64) -> f64 {
    celsius + KELVIN_OFFSET
}

/// Converts a unix timestamp (seconds) to an absolute UTC instant
pub fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

// ============================================
// NORMALIZED RECORD
// ============================================

/// City identity as extracted from a validated record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRef {
    pub name: String,
    /// Provider country code, used as the Country natural key
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A single temperature reading, already in Kelvin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub observed_at: DateTime<Utc>,
    pub temperature_k: f64,
}

/// Output of the schema validator
///
/// Historical feeds carry many readings, current feeds exactly one and the
/// city catalogue none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub city: CityRef,
    pub readings: Vec<Reading>,
}

// ============================================
// SHARED WIRE SHAPES
// ============================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Coordinates {
    #[serde(deserialize_with = "lenient_f64")]
    #[validate(range(min = -180.0, max = 180.0))]
    pub lon: f64,
    #[serde(deserialize_with = "lenient_f64")]
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
}

/// City block nested in OpenWeather bulk records
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CityData {
    #[serde(deserialize_with = "lenient_string")]
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(nested)]
    pub coord: Coordinates,
    #[serde(deserialize_with = "lenient_string")]
    #[validate(length(min = 1))]
    pub country: String,
}

impl CityData {
    pub fn to_city_ref(&self) -> CityRef {
        CityRef {
            name: self.name.clone(),
            country: self.country.clone(),
            latitude: self.coord.lat,
            longitude: self.coord.lon,
        }
    }
}

/// Temperature block with a single `temp` value
#[derive(Debug, Clone, Deserialize)]
pub struct TempValue {
    #[serde(deserialize_with = "lenient_f64")]
    pub temp: f64,
}

// ============================================
// LENIENT COERCION
// ============================================

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Number(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntegerLike {
    Integer(i64),
    Float(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextLike {
    Text(String),
    Integer(i64),
    Float(f64),
}

/// Accepts a JSON number or a numeric string; rejects non-finite values
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match NumberLike::deserialize(deserializer)
        .map_err(|_| D::Error::custom("expected a number"))?
    {
        NumberLike::Number(n) => n,
        NumberLike::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("expected a number, found \"{s}\"")))?,
    };

    if !value.is_finite() {
        return Err(D::Error::custom("expected a finite number"));
    }
    Ok(value)
}

/// Accepts an integer, an integral float or an integer string
pub fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match IntegerLike::deserialize(deserializer)
        .map_err(|_| D::Error::custom("expected an integer"))?
    {
        IntegerLike::Integer(i) => Ok(i),
        IntegerLike::Float(f) => integral(f)
            .ok_or_else(|| D::Error::custom(format!("expected an integer, found {f}"))),
        IntegerLike::Text(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().and_then(integral))
                .ok_or_else(|| D::Error::custom(format!("expected an integer, found \"{s}\"")))
        }
    }
}

/// Accepts a string or a number rendered as a string
pub fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match TextLike::deserialize(deserializer)
        .map_err(|_| D::Error::custom("expected a string"))?
    {
        TextLike::Text(s) => Ok(s),
        TextLike::Integer(i) => Ok(i.to_string()),
        TextLike::Float(f) => Ok(f.to_string()),
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

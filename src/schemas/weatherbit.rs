//! WeatherBit schemas
//!
//! WeatherBit reports Celsius; readings are converted to Kelvin here so the
//! store only ever sees one unit.

use serde::Deserialize;
use validator::Validate;

use super::aliases::{self, FieldAlias};
use super::common::{
    celsius_to_kelvin, lenient_f64, lenient_i64, lenient_string, unix_to_utc, CityRef,
    NormalizedRecord, Reading,
};
use super::{ProviderSchema, SchemaKind};

/// Row of the WeatherBit city export
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WbCity {
    #[serde(deserialize_with = "lenient_string")]
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(deserialize_with = "lenient_f64")]
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[serde(deserialize_with = "lenient_f64")]
    #[validate(range(min = -180.0, max = 180.0))]
    pub lon: f64,
    #[serde(deserialize_with = "lenient_string")]
    #[validate(length(min = 1))]
    pub country: String,
}

/// One observation inside a current-weather response
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WbData {
    #[serde(deserialize_with = "lenient_f64")]
    #[validate(range(min = -180.0, max = 180.0))]
    pub lon: f64,
    #[serde(deserialize_with = "lenient_f64")]
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[serde(deserialize_with = "lenient_string")]
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    #[validate(length(min = 1))]
    pub country: String,
    /// Observation time, wire `ts`
    #[serde(deserialize_with = "lenient_i64")]
    pub date: i64,
    /// Celsius
    #[serde(deserialize_with = "lenient_f64")]
    pub temp: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WbCurrent {
    /// Checked in `normalize`; only the first entry is validated
    pub data: Vec<WbData>,
}

impl ProviderSchema for WbCity {
    const KIND: SchemaKind = SchemaKind::WbCity;
    const ALIASES: &'static [FieldAlias] = aliases::WB_CITY;

    fn normalize(self) -> Result<NormalizedRecord, String> {
        Ok(NormalizedRecord {
            city: CityRef {
                name: self.name,
                country: self.country,
                latitude: self.lat,
                longitude: self.lon,
            },
            readings: Vec::new(),
        })
    }
}

impl ProviderSchema for WbCurrent {
    const KIND: SchemaKind = SchemaKind::WbCurrent;
    const ALIASES: &'static [FieldAlias] = aliases::WB_CURRENT;

    fn normalize(self) -> Result<NormalizedRecord, String> {
        // Only the first observation describes the requested city.
        let first = self
            .data
            .into_iter()
            .next()
            .ok_or_else(|| "data: empty observation list".to_string())?;
        first.validate().map_err(|e| format!("data[0]: {e}"))?;

        let observed_at = unix_to_utc(first.date)
            .ok_or_else(|| format!("timestamp {} is out of range", first.date))?;

        Ok(NormalizedRecord {
            city: CityRef {
                name: first.name,
                country: first.country,
                latitude: first.lat,
                longitude: first.lon,
            },
            readings: vec![Reading {
                observed_at,
                temperature_k: celsius_to_kelvin(first.temp),
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::schemas::{validate, SchemaKind};
    use serde_json::json;

    #[test]
    fn test_city_row() {
        let raw = json!({
            "city_id": "3038789",
            "city_name": "Abbeville",
            "state_code": "B4",
            "country_code": "FR",
            "country_full": "France",
            "lat": "50.10000",
            "lon": "1.83333"
        });

        let record = validate(SchemaKind::WbCity, &raw).unwrap();
        assert_eq!(record.city.name, "Abbeville");
        assert_eq!(record.city.country, "FR");
        assert_eq!(record.city.latitude, 50.1);
        assert!(record.readings.is_empty());
    }

    #[test]
    fn test_current_converts_celsius_to_kelvin() {
        let raw = json!({
            "count": 1,
            "data": [{
                "city_name": "Raleigh",
                "country_code": "US",
                "lat": 35.7721,
                "lon": -78.63861,
                "ts": 1_700_000_000,
                "temp": 20.0,
                "weather": {"description": "Clear sky"}
            }]
        });

        let record = validate(SchemaKind::WbCurrent, &raw).unwrap();
        assert_eq!(record.city.name, "Raleigh");
        assert_eq!(record.readings.len(), 1);
        assert!((record.readings[0].temperature_k - 293.15).abs() < 1e-6);
        assert_eq!(record.readings[0].observed_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_current_with_empty_data_fails() {
        let raw = json!({"count": 0, "data": []});
        let err = validate(SchemaKind::WbCurrent, &raw).unwrap_err();
        assert!(err.reason.contains("empty observation list"), "reason was {}", err.reason);
    }

    #[test]
    fn test_current_with_non_numeric_temperature_fails() {
        let raw = json!({
            "data": [{
                "city_name": "Raleigh",
                "country_code": "US",
                "lat": 35.7721,
                "lon": -78.63861,
                "ts": 1_700_000_000,
                "temp": "hot"
            }]
        });
        let err = validate(SchemaKind::WbCurrent, &raw).unwrap_err();
        assert!(err.reason.contains("expected a number"), "reason was {}", err.reason);
    }
}

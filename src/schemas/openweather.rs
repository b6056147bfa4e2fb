//! OpenWeather bulk schemas
//!
//! The bulk dumps report temperatures in Kelvin already, so normalization
//! only converts timestamps.

use serde::Deserialize;
use validator::Validate;

use super::aliases::{self, FieldAlias};
use super::common::{lenient_i64, unix_to_utc, CityData, NormalizedRecord, Reading, TempValue};
use super::{ProviderSchema, SchemaKind};

/// One day of a daily forecast; `temp.temp` is the wire `temp.day`
#[derive(Debug, Clone, Deserialize)]
pub struct DailyEntry {
    #[serde(deserialize_with = "lenient_i64")]
    pub dt: i64,
    pub temp: TempValue,
}

/// One hour of an hourly forecast; `temp` is the wire `main` block
#[derive(Debug, Clone, Deserialize)]
pub struct HourlyEntry {
    #[serde(deserialize_with = "lenient_i64")]
    pub dt: i64,
    pub temp: TempValue,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OwDaily {
    #[validate(nested)]
    pub city: CityData,
    pub data: Vec<DailyEntry>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OwHourly {
    #[validate(nested)]
    pub city: CityData,
    pub data: Vec<HourlyEntry>,
}

/// Current conditions; `data` is the wire `main`, `dt` the wire `time`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OwCurrent {
    #[validate(nested)]
    pub city: CityData,
    pub data: TempValue,
    #[serde(deserialize_with = "lenient_i64")]
    pub dt: i64,
}

fn reading(dt: i64, temperature_k: f64) -> Result<Reading, String> {
    let observed_at = unix_to_utc(dt).ok_or_else(|| format!("timestamp {dt} is out of range"))?;
    Ok(Reading { observed_at, temperature_k })
}

impl ProviderSchema for OwDaily {
    const KIND: SchemaKind = SchemaKind::OwDaily;
    const ALIASES: &'static [FieldAlias] = aliases::OW_DAILY;

    fn normalize(self) -> Result<NormalizedRecord, String> {
        let readings = self
            .data
            .iter()
            .map(|entry| reading(entry.dt, entry.temp.temp))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NormalizedRecord { city: self.city.to_city_ref(), readings })
    }
}

impl ProviderSchema for OwHourly {
    const KIND: SchemaKind = SchemaKind::OwHourly;
    const ALIASES: &'static [FieldAlias] = aliases::OW_HOURLY;

    fn normalize(self) -> Result<NormalizedRecord, String> {
        let readings = self
            .data
            .iter()
            .map(|entry| reading(entry.dt, entry.temp.temp))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NormalizedRecord { city: self.city.to_city_ref(), readings })
    }
}

impl ProviderSchema for OwCurrent {
    const KIND: SchemaKind = SchemaKind::OwCurrent;
    const ALIASES: &'static [FieldAlias] = aliases::OW_CURRENT;

    fn normalize(self) -> Result<NormalizedRecord, String> {
        Ok(NormalizedRecord {
            city: self.city.to_city_ref(),
            readings: vec![reading(self.dt, self.data.temp)?],
        })
    }
}

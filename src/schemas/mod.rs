//! Provider Schemas
//!
//! Validates loosely-typed provider JSON against a named schema and
//! produces a [`NormalizedRecord`]. A record that does not fit its schema
//! yields a [`ValidationError`] carrying the raw input; it never panics, so
//! callers can keep processing the rest of a batch.

pub mod aliases;
pub mod common;
pub mod openweather;
pub mod weatherbit;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

pub use common::*;
pub use openweather::{OwCurrent, OwDaily, OwHourly};
pub use weatherbit::{WbCity, WbCurrent};

use aliases::FieldAlias;

/// A raw per-record mapping as read from a provider payload
pub type RawRecord = serde_json::Value;

/// Named provider schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    OwDaily,
    OwHourly,
    OwCurrent,
    WbCity,
    WbCurrent,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::OwDaily => "ow_daily",
            SchemaKind::OwHourly => "ow_hourly",
            SchemaKind::OwCurrent => "ow_current",
            SchemaKind::WbCity => "wb_city",
            SchemaKind::WbCurrent => "wb_current",
        }
    }

    /// Field-mapping table for this schema
    pub fn aliases(&self) -> &'static [FieldAlias] {
        match self {
            SchemaKind::OwDaily => OwDaily::ALIASES,
            SchemaKind::OwHourly => OwHourly::ALIASES,
            SchemaKind::OwCurrent => OwCurrent::ALIASES,
            SchemaKind::WbCity => WbCity::ALIASES,
            SchemaKind::WbCurrent => WbCurrent::ALIASES,
        }
    }
}

impl std::fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that failed its schema
#[derive(Debug, Clone, Error)]
#[error("invalid {schema} record: {reason}")]
pub struct ValidationError {
    pub schema: SchemaKind,
    pub reason: String,
    pub raw: RawRecord,
}

/// A typed provider shape that can be normalized
pub trait ProviderSchema: DeserializeOwned + Validate {
    const KIND: SchemaKind;
    const ALIASES: &'static [FieldAlias];

    fn normalize(self) -> Result<NormalizedRecord, String>;
}

/// Validates `raw` against `kind`
pub fn validate(kind: SchemaKind, raw: &RawRecord) -> Result<NormalizedRecord, ValidationError> {
    match kind {
        SchemaKind::OwDaily => validate_as::<OwDaily>(raw),
        SchemaKind::OwHourly => validate_as::<OwHourly>(raw),
        SchemaKind::OwCurrent => validate_as::<OwCurrent>(raw),
        SchemaKind::WbCity => validate_as::<WbCity>(raw),
        SchemaKind::WbCurrent => validate_as::<WbCurrent>(raw),
    }
}

/// Validates `raw` as the concrete schema `T`
pub fn validate_as<T: ProviderSchema>(raw: &RawRecord) -> Result<NormalizedRecord, ValidationError> {
    let fail = |reason: String| ValidationError {
        schema: T::KIND,
        reason,
        raw: raw.clone(),
    };

    if !raw.is_object() {
        return Err(fail("expected a JSON object".to_string()));
    }

    let mut renamed = raw.clone();
    aliases::apply(T::ALIASES, &mut renamed);

    let typed: T = serde_json::from_value(renamed).map_err(|e| fail(e.to_string()))?;
    typed.validate().map_err(|e| fail(e.to_string()))?;
    typed.normalize().map_err(fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validation_is_deterministic() {
        let raw = json!({
            "city": {"name": "Kyiv", "country": "UA", "coord": {"lon": 30.5, "lat": 50.45}},
            "data": [{"dt": 1_600_000_000, "temp": {"day": 290.0}}]
        });

        let first = validate(SchemaKind::OwDaily, &raw).unwrap();
        let second = validate(SchemaKind::OwDaily, &raw).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_non_object_record_fails() {
        let raw = json!([1, 2, 3]);
        let err = validate(SchemaKind::WbCity, &raw).unwrap_err();
        assert_eq!(err.schema, SchemaKind::WbCity);
        assert!(err.to_string().starts_with("invalid wb_city record"));
    }

    #[test]
    fn test_every_schema_has_an_alias_table() {
        for kind in [
            SchemaKind::OwDaily,
            SchemaKind::OwHourly,
            SchemaKind::OwCurrent,
            SchemaKind::WbCity,
            SchemaKind::WbCurrent,
        ] {
            assert!(!kind.aliases().is_empty(), "{kind} has no aliases");
        }
    }
}

//! Provider field-mapping tables
//!
//! Providers name fields differently from the semantic names the schema
//! structs use (`day` for a daily temperature, `ts` for a timestamp). Each
//! schema owns a static table of renames applied to the raw record before
//! typed deserialization.

use serde_json::Value;

/// Path segment that matches every element of a JSON array
pub const EACH: &str = "[]";

/// One rename rule: at `path`, the wire key `wire` becomes `semantic`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAlias {
    pub path: &'static [&'static str],
    pub wire: &'static str,
    pub semantic: &'static str,
}

impl FieldAlias {
    pub const fn new(
        path: &'static [&'static str],
        wire: &'static str,
        semantic: &'static str,
    ) -> Self {
        Self { path, wire, semantic }
    }
}

pub const OW_DAILY: &[FieldAlias] = &[FieldAlias::new(&["data", EACH, "temp"], "day", "temp")];

pub const OW_HOURLY: &[FieldAlias] = &[FieldAlias::new(&["data", EACH], "main", "temp")];

pub const OW_CURRENT: &[FieldAlias] = &[
    FieldAlias::new(&[], "main", "data"),
    FieldAlias::new(&[], "time", "dt"),
];

pub const WB_CITY: &[FieldAlias] = &[
    FieldAlias::new(&[], "city_name", "name"),
    FieldAlias::new(&[], "country_code", "country"),
];

pub const WB_CURRENT: &[FieldAlias] = &[
    FieldAlias::new(&["data", EACH], "city_name", "name"),
    FieldAlias::new(&["data", EACH], "country_code", "country"),
    FieldAlias::new(&["data", EACH], "ts", "date"),
];

/// Applies every rule of `table` to `value`, in table order
///
/// A wire key, when present, replaces any key already carrying the
/// semantic name. Missing paths are ignored; the typed deserializer reports
/// whatever ends up missing.
pub fn apply(table: &[FieldAlias], value: &mut Value) {
    for alias in table {
        rename_at(value, alias.path, alias.wire, alias.semantic);
    }
}

fn rename_at(value: &mut Value, path: &[&str], wire: &str, semantic: &str) {
    match path.split_first() {
        None => {
            if let Value::Object(map) = value {
                if let Some(v) = map.remove(wire) {
                    map.insert(semantic.to_string(), v);
                }
            }
        }
        Some((&EACH, rest)) => {
            if let Value::Array(items) = value {
                for item in items {
                    rename_at(item, rest, wire, semantic);
                }
            }
        }
        Some((key, rest)) => {
            if let Some(child) = value.get_mut(*key) {
                rename_at(child, rest, wire, semantic);
            }
        }
    }
}

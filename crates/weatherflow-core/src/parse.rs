//! Raw message validation and decoding into [`WeatherEvent`]s.
//!
//! Producers do not agree on field names: the replay generator emits
//! `pressure_kPa`, `wind_speed_km/h` and `weather`, while other publishers
//! send `pressure`, `windspeed` and `weather_type`. A [`FieldMapping`] lists
//! the accepted keys for each semantic field; the first key present (and not
//! `null`) wins. Each key can carry a scale factor so every event leaves the
//! parser in the same units (hPa, km/h).
//!
//! Parsing is pure. The ingest loop decides what to do with a
//! [`ParseError`]; the store never sees a rejected message.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use weatherflow_types::{Category, WeatherEvent};

/// Naive timestamp layouts accepted in addition to RFC 3339. Interpreted as UTC.
const NAIVE_TIMESTAMP_FORMATS: [&str; 3] =
    ["%m/%d/%Y %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Reasons a raw message cannot become a [`WeatherEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The payload is not JSON, or not a JSON object.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A required field is absent, `null`, or (for the category) empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A numeric field holds a value that is not a finite number, or one
    /// that overflows once scaled into canonical units. Carries the
    /// semantic field name and the offending value.
    #[error("field {0} is not a valid number: {1}")]
    InvalidNumeric(String, String),

    /// A numeric field parsed but lies outside its physical domain.
    #[error("field {0} is out of range: {1}")]
    OutOfRange(String, String),

    /// The category field is present but not a string.
    #[error("category must be a string, got {0}")]
    InvalidCategory(String),
}

/// One accepted key for a numeric field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldAlias {
    /// JSON key to look up.
    pub key: String,
    /// Multiplier applied to the value to reach canonical units.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

impl FieldAlias {
    /// An alias whose values are already in canonical units.
    pub fn plain(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            scale: 1.0,
        }
    }

    /// An alias whose values are multiplied by `scale`.
    pub fn scaled(key: &str, scale: f64) -> Self {
        Self {
            key: key.to_owned(),
            scale,
        }
    }
}

/// Accepted JSON keys for each semantic field, in priority order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldMapping {
    /// Keys for pressure. Canonical unit is hPa.
    #[serde(default = "default_pressure_aliases")]
    pub pressure: Vec<FieldAlias>,

    /// Keys for wind speed. Canonical unit is km/h.
    #[serde(default = "default_windspeed_aliases")]
    pub windspeed: Vec<FieldAlias>,

    /// Keys for the weather-type label.
    #[serde(default = "default_category_keys")]
    pub category: Vec<String>,

    /// Keys for the observation timestamp.
    #[serde(default = "default_timestamp_keys")]
    pub timestamp: Vec<String>,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            pressure: default_pressure_aliases(),
            windspeed: default_windspeed_aliases(),
            category: default_category_keys(),
            timestamp: default_timestamp_keys(),
        }
    }
}

/// Decodes raw payloads into events according to a [`FieldMapping`].
#[derive(Debug, Clone, Default)]
pub struct EventParser {
    fields: FieldMapping,
}

impl EventParser {
    /// Create a parser with the given field mapping.
    pub const fn new(fields: FieldMapping) -> Self {
        Self { fields }
    }

    /// The field mapping in use.
    pub const fn fields(&self) -> &FieldMapping {
        &self.fields
    }

    /// Parse a JSON payload.
    ///
    /// `received_at` becomes the event timestamp when the record carries no
    /// recognisable timestamp of its own.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Malformed`] if the payload is not a JSON object,
    /// otherwise whatever [`parse_record`](Self::parse_record) returns.
    pub fn parse(
        &self,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<WeatherEvent, ParseError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| ParseError::Malformed(format!("invalid JSON: {e}")))?;
        match value {
            Value::Object(record) => self.parse_record(&record, received_at),
            other => Err(ParseError::Malformed(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse an already-decoded record.
    ///
    /// Fields are checked in order: pressure, windspeed, category.
    ///
    /// # Errors
    ///
    /// - [`ParseError::MissingField`] if no key for a field is present
    /// - [`ParseError::InvalidNumeric`] if pressure or windspeed is not a
    ///   finite number
    /// - [`ParseError::OutOfRange`] if windspeed is negative
    /// - [`ParseError::InvalidCategory`] if the category is not a string
    pub fn parse_record(
        &self,
        record: &Map<String, Value>,
        received_at: DateTime<Utc>,
    ) -> Result<WeatherEvent, ParseError> {
        let pressure = resolve_numeric(record, &self.fields.pressure, "pressure")?;

        let windspeed = resolve_numeric(record, &self.fields.windspeed, "windspeed")?;
        if windspeed < 0.0 {
            return Err(ParseError::OutOfRange(
                String::from("windspeed"),
                windspeed.to_string(),
            ));
        }

        let category = resolve_category(record, &self.fields.category)?;
        let timestamp = resolve_timestamp(record, &self.fields.timestamp).unwrap_or(received_at);

        Ok(WeatherEvent {
            timestamp,
            pressure,
            windspeed,
            category,
        })
    }
}

/// Find the first present, non-null alias and decode it as a scaled number.
fn resolve_numeric(
    record: &Map<String, Value>,
    aliases: &[FieldAlias],
    field: &'static str,
) -> Result<f64, ParseError> {
    let (alias, value) = aliases
        .iter()
        .find_map(|alias| {
            record
                .get(&alias.key)
                .filter(|v| !v.is_null())
                .map(|v| (alias, v))
        })
        .ok_or(ParseError::MissingField(field))?;

    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    let Some(n) = raw.filter(|n| n.is_finite()) else {
        return Err(ParseError::InvalidNumeric(field.to_owned(), value.to_string()));
    };
    let scaled = n * alias.scale;
    if scaled.is_finite() {
        Ok(scaled)
    } else {
        Err(ParseError::InvalidNumeric(
            field.to_owned(),
            format!("{value} from {} overflows when scaled by {}", alias.key, alias.scale),
        ))
    }
}

/// Find the first present, non-null category key.
fn resolve_category(record: &Map<String, Value>, keys: &[String]) -> Result<Category, ParseError> {
    let value = keys
        .iter()
        .find_map(|key| record.get(key).filter(|v| !v.is_null()))
        .ok_or(ParseError::MissingField("category"))?;

    match value {
        Value::String(s) => {
            let label = s.trim();
            if label.is_empty() {
                Err(ParseError::MissingField("category"))
            } else {
                Ok(Category::from(label))
            }
        }
        other => Err(ParseError::InvalidCategory(other.to_string())),
    }
}

/// Decode the first timestamp key that yields a recognisable time.
fn resolve_timestamp(record: &Map<String, Value>, keys: &[String]) -> Option<DateTime<Utc>> {
    keys.iter()
        .filter_map(|key| record.get(key))
        .find_map(|value| match value {
            Value::String(s) => parse_timestamp_str(s.trim()),
            Value::Number(n) => from_unix_seconds(n),
            _ => None,
        })
}

/// Unix seconds, integral or fractional. Negative fractions are not accepted.
fn from_unix_seconds(n: &Number) -> Option<DateTime<Utc>> {
    if let Some(secs) = n.as_i64() {
        return DateTime::from_timestamp(secs, 0);
    }
    let elapsed = Duration::try_from_secs_f64(n.as_f64()?).ok()?;
    DateTime::UNIX_EPOCH.checked_add_signed(TimeDelta::from_std(elapsed).ok()?)
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_scale() -> f64 {
    1.0
}

fn default_pressure_aliases() -> Vec<FieldAlias> {
    vec![
        FieldAlias::plain("pressure"),
        FieldAlias::plain("pressure_hPa"),
        FieldAlias::scaled("pressure_kPa", 10.0),
    ]
}

fn default_windspeed_aliases() -> Vec<FieldAlias> {
    vec![
        FieldAlias::plain("windspeed"),
        FieldAlias::plain("wind_speed"),
        FieldAlias::plain("wind_speed_km/h"),
    ]
}

fn default_category_keys() -> Vec<String> {
    vec![
        String::from("weather_type"),
        String::from("category"),
        String::from("weather"),
    ]
}

fn default_timestamp_keys() -> Vec<String> {
    vec![String::from("timestamp"), String::from("datetime")]
}

//! The weather observation event and its grouping key.
//!
//! A [`WeatherEvent`] is one decoded observation. It is immutable once built:
//! the parser constructs it, the aggregate store reads it, nothing mutates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The weather-type label used as the aggregation grouping key.
///
/// Categories form an open-ended set ("Rain", "Clear", "Snow", "Fog", ...).
/// New labels may appear at any point in a stream, so this is a string
/// newtype rather than an enumeration. Ordering is lexicographic on the
/// underlying label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Category(String);

impl Category {
    /// Create a category from a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Borrow the label.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the category and return the label.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for Category {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Category {
    fn from(label: &str) -> Self {
        Self(label.to_owned())
    }
}

impl From<String> for Category {
    fn from(label: String) -> Self {
        Self(label)
    }
}

impl AsRef<str> for Category {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl core::borrow::Borrow<str> for Category {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One parsed weather observation.
///
/// `pressure` is in hPa and `windspeed` in km/h. The informal pressure range
/// is 800 to 1100 hPa; values outside it are carried as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WeatherEvent {
    /// When the observation was generated (or received, if the record
    /// carried no usable timestamp).
    pub timestamp: DateTime<Utc>,
    /// Station pressure in hPa.
    pub pressure: f64,
    /// Wind speed in km/h, non-negative for parser-produced events.
    pub windspeed: f64,
    /// Weather-type label.
    pub category: Category,
}

impl WeatherEvent {
    /// Build an event from its parts.
    pub fn new(
        timestamp: DateTime<Utc>,
        pressure: f64,
        windspeed: f64,
        category: impl Into<Category>,
    ) -> Self {
        Self {
            timestamp,
            pressure,
            windspeed,
            category: category.into(),
        }
    }
}

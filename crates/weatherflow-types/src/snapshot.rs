//! Snapshot records handed to renderers.
//!
//! An [`AggregateSnapshot`] is the point-in-time view of every category the
//! store has seen. Renderers that want a grouped bar chart (one bar per
//! metric per category) can melt it into [`LongFormatRow`]s with
//! [`AggregateSnapshot::to_long_format`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Running averages for one category at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CategoryAverage {
    /// The weather-type label.
    pub category: String,
    /// Mean pressure in hPa over every event folded into this category.
    pub avg_pressure: f64,
    /// Mean wind speed in km/h over every event folded into this category.
    pub avg_windspeed: f64,
    /// Number of events folded into this category. Always at least 1.
    pub count: u64,
}

/// A consistent view of all category aggregates.
///
/// `categories` is sorted lexicographically by label so consecutive
/// snapshots keep the same axis order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AggregateSnapshot {
    /// Wall-clock time the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Total number of events folded into the store at snapshot time.
    pub events_folded: u64,
    /// Per-category averages in lexicographic label order.
    pub categories: Vec<CategoryAverage>,
}

impl AggregateSnapshot {
    /// An empty snapshot (no events folded yet).
    pub const fn empty(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            events_folded: 0,
            categories: Vec::new(),
        }
    }

    /// Whether the snapshot holds no categories.
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Look up a category by label.
    pub fn category(&self, label: &str) -> Option<&CategoryAverage> {
        self.categories.iter().find(|c| c.category == label)
    }

    /// Melt the snapshot into long format: one row per category per metric.
    ///
    /// Rows are category-major, with [`Metric::AvgPressure`] before
    /// [`Metric::AvgWindspeed`] for each category.
    pub fn to_long_format(&self) -> Vec<LongFormatRow> {
        self.categories
            .iter()
            .flat_map(|c| {
                Metric::ALL.into_iter().map(move |metric| LongFormatRow {
                    category: c.category.clone(),
                    metric,
                    value: metric.value_of(c),
                })
            })
            .collect()
    }
}

/// An averaged metric in long-format output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Metric {
    /// Mean pressure (hPa).
    AvgPressure,
    /// Mean wind speed (km/h).
    AvgWindspeed,
}

impl Metric {
    /// Every metric, in output order.
    pub const ALL: [Self; 2] = [Self::AvgPressure, Self::AvgWindspeed];

    /// Read this metric from a category average.
    pub const fn value_of(self, average: &CategoryAverage) -> f64 {
        match self {
            Self::AvgPressure => average.avg_pressure,
            Self::AvgWindspeed => average.avg_windspeed,
        }
    }

    /// Column label used in tables and charts.
    pub const fn label(self) -> &'static str {
        match self {
            Self::AvgPressure => "avg_pressure",
            Self::AvgWindspeed => "avg_windspeed",
        }
    }
}

impl core::fmt::Display for Metric {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of a long-format (tidy) table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LongFormatRow {
    /// The weather-type label.
    pub category: String,
    /// Which average this row carries.
    pub metric: Metric,
    /// The averaged value.
    pub value: f64,
}

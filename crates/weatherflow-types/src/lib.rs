//! Shared type definitions for the Weatherflow aggregation pipeline.
//!
//! This crate holds the value types that cross crate boundaries: the parsed
//! observation and the snapshot records renderers consume. Types flow to
//! `TypeScript` via `ts-rs` for the observer dashboard.
//!
//! # Modules
//!
//! - [`event`] -- [`WeatherEvent`] and the [`Category`] grouping key
//! - [`snapshot`] -- [`AggregateSnapshot`], [`CategoryAverage`] and the
//!   long-format projection

pub mod event;
pub mod snapshot;

// Re-export all public types at crate root for convenience.
pub use event::{Category, WeatherEvent};
pub use snapshot::{AggregateSnapshot, CategoryAverage, LongFormatRow, Metric};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // Files are written to `bindings/` relative to the crate root.
        use ts_rs::TS;

        let _ = crate::event::Category::export_all();
        let _ = crate::event::WeatherEvent::export_all();
        let _ = crate::snapshot::CategoryAverage::export_all();
        let _ = crate::snapshot::AggregateSnapshot::export_all();
        let _ = crate::snapshot::Metric::export_all();
        let _ = crate::snapshot::LongFormatRow::export_all();
    }
}

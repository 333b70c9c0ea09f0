//! Per-category running aggregates with torn-free snapshots.
//!
//! [`AggregateStore`] is the only shared mutable state in the pipeline. One
//! ingest task folds events in with [`AggregateStore::update`]; any number of
//! readers (the render loop, observer handlers) call
//! [`AggregateStore::snapshot`] on their own cadence.
//!
//! # Locking
//!
//! A single [`RwLock`] guards the whole category map together with the
//! store-wide event counter. `update` holds the write lock for the full
//! count-and-sums change, so no reader can see a count without its sums.
//! Both critical sections are synchronous: there is no `.await` while the
//! lock is held, which also means cancelling a task can never leave an
//! update half applied.
//!
//! # Snapshot policy
//!
//! A snapshot is the state of the map at the instant its read lock was
//! acquired. Categories first seen after that instant show up in the next
//! snapshot. Categories are returned in lexicographic label order.
//!
//! # Precision
//!
//! Averages come from plain `f64` running sums. For the expected volume (one
//! event per simulated hour, thousands of same-scale values per category)
//! the rounding error stays far below display precision. A category
//! accumulating millions of events would need a compensated (Kahan) sum to
//! keep the 1e-9 relative error bound.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{debug, error};
use weatherflow_types::{AggregateSnapshot, Category, CategoryAverage, WeatherEvent};

/// Errors raised by the aggregate store.
///
/// Never a data problem: it means the locking discipline was broken
/// somewhere, and callers should stop processing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store's internal state is inconsistent or its lock was poisoned.
    #[error("aggregate store invariant violated: {0}")]
    InvariantViolation(String),
}

/// Running count and sums for one category.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CategoryAggregate {
    count: u64,
    pressure_sum: f64,
    windspeed_sum: f64,
}

impl CategoryAggregate {
    /// Fold one observation into the aggregate.
    pub fn fold(&mut self, pressure: f64, windspeed: f64) {
        self.count = self.count.saturating_add(1);
        self.pressure_sum += pressure;
        self.windspeed_sum += windspeed;
    }

    /// Number of events folded in.
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Sum of folded pressures.
    pub const fn pressure_sum(&self) -> f64 {
        self.pressure_sum
    }

    /// Sum of folded wind speeds.
    pub const fn windspeed_sum(&self) -> f64 {
        self.windspeed_sum
    }

    /// Mean pressure. `None` before the first fold.
    pub fn avg_pressure(&self) -> Option<f64> {
        self.mean(self.pressure_sum)
    }

    /// Mean wind speed. `None` before the first fold.
    pub fn avg_windspeed(&self) -> Option<f64> {
        self.mean(self.windspeed_sum)
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean(&self, sum: f64) -> Option<f64> {
        (self.count > 0).then(|| sum / self.count as f64)
    }

    fn to_average(self, category: &Category) -> Option<CategoryAverage> {
        Some(CategoryAverage {
            category: category.to_string(),
            avg_pressure: self.avg_pressure()?,
            avg_windspeed: self.avg_windspeed()?,
            count: self.count,
        })
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    categories: BTreeMap<Category, CategoryAggregate>,
    events_folded: u64,
}

/// Thread-safe map from category to running aggregate.
///
/// Created empty, shared by `Arc`, dropped at shutdown. Nothing is
/// persisted.
#[derive(Debug, Default)]
pub struct AggregateStore {
    inner: RwLock<StoreInner>,
}

impl AggregateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an event into its category, creating the category on first sight.
    ///
    /// NaN or negative values are accepted arithmetically; validation
    /// belongs to the parser.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvariantViolation`] if the lock was poisoned by
    /// a panicking writer. The store must not be trusted after that.
    pub fn update(&self, event: &WeatherEvent) -> Result<(), StoreError> {
        let mut inner = self.write()?;

        let created = !inner.categories.contains_key(&event.category);
        inner
            .categories
            .entry(event.category.clone())
            .or_default()
            .fold(event.pressure, event.windspeed);
        inner.events_folded = inner.events_folded.saturating_add(1);
        let events_folded = inner.events_folded;
        drop(inner);

        if created {
            debug!(category = %event.category, "new category observed");
        }
        debug!(
            category = %event.category,
            pressure = event.pressure,
            windspeed = event.windspeed,
            events_folded,
            "event folded"
        );
        Ok(())
    }

    /// Take a consistent snapshot of every category.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvariantViolation`] if the lock was poisoned or
    /// the per-category counts do not add up to the number of folded events.
    pub fn snapshot(&self) -> Result<AggregateSnapshot, StoreError> {
        let inner = self.read()?;

        let counted = inner
            .categories
            .values()
            .fold(0_u64, |acc, agg| acc.saturating_add(agg.count));
        if counted != inner.events_folded {
            let message = format!(
                "category counts sum to {counted} but {} events were folded",
                inner.events_folded
            );
            error!(%message, "torn aggregate state detected");
            return Err(StoreError::InvariantViolation(message));
        }

        let categories = inner
            .categories
            .iter()
            .filter_map(|(category, agg)| agg.to_average(category))
            .collect();

        Ok(AggregateSnapshot {
            taken_at: Utc::now(),
            events_folded: inner.events_folded,
            categories,
        })
    }

    /// Averages for a single category, if it has been seen.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvariantViolation`] if the lock was poisoned.
    pub fn category(&self, label: &str) -> Result<Option<CategoryAverage>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .categories
            .get_key_value(label)
            .and_then(|(category, agg)| agg.to_average(category)))
    }

    /// Number of distinct categories seen so far.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvariantViolation`] if the lock was poisoned.
    pub fn category_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.categories.len())
    }

    /// Total number of events folded in.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvariantViolation`] if the lock was poisoned.
    pub fn events_folded(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.events_folded)
    }

    /// Whether no event has been folded yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvariantViolation`] if the lock was poisoned.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.events_folded == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>, StoreError> {
        self.inner.read().map_err(poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>, StoreError> {
        self.inner.write().map_err(poisoned)
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    error!("aggregate store lock poisoned");
    StoreError::InvariantViolation(String::from("lock poisoned by a panicking writer"))
}

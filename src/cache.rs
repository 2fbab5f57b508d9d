//! Cache.
//!
//! Latest-reading lookup keyed by `sensor_id`, backed by `DashMap` so reads
//! and writes from different sensor workers never contend on a single lock.
//! Entries older than the TTL are treated as absent on read rather than
//! evicted eagerly.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::defaults;
use crate::types::Reading;

#[derive(Debug, Clone)]
struct CachedReading {
    reading: Reading,
    cached_at: Instant,
}

pub struct ReadingCache {
    entries: DashMap<String, CachedReading>,
    ttl: Duration,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::from_secs(defaults::CACHE_TTL_SECS),
        }
    }

    /// Overwrite the latest whole reading for this sensor. A reading only
    /// ever carries a subset of fields; the cache stores whatever arrived
    /// most recently rather than merging field-by-field across readings.
    pub fn put(&self, reading: Reading) {
        self.entries.insert(
            reading.sensor_id.clone(),
            CachedReading {
                reading,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, sensor_id: &str) -> Option<Reading> {
        let entry = self.entries.get(sensor_id)?;
        if entry.cached_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.reading.clone())
    }

    /// One field's cached value, if the cached reading is fresh and carries
    /// it.
    pub fn get_field(&self, sensor_id: &str, field: &str) -> Option<f64> {
        self.get(sensor_id)?.get(field)
    }
}

impl Default for ReadingCache {
    fn default() -> Self {
        Self::new()
    }
}

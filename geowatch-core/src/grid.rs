//! Spatial Grid - coarse lat/lon buckets for proximity lookups
//!
//! The grid is the event store the rest of the engine reads from:
//! - Events are binned by truncating coordinates to a fixed bucket size
//! - Re-ingesting an id supersedes the stored copy
//! - Each cell keeps a bounded rolling list, oldest dropped first
//! - Queries only ever return events still inside their retention window

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::{
    CoreError, NormalizedEvent, RetentionPolicy, SignalKind, DEFAULT_BUCKET_DEGREES,
    DEFAULT_CELL_CAPACITY,
};

/// Quantized (lat_bucket, lon_bucket) cell coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub lat: i32,
    pub lon: i32,
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.lat, self.lon)
    }
}

/// An event plus when the grid received it
#[derive(Debug, Clone)]
pub struct GridEntry {
    pub event: Arc<NormalizedEvent>,
    pub inserted_at: DateTime<Utc>,
}

/// One bucket of the grid
#[derive(Debug, Clone, Default)]
pub struct GridCell {
    entries: VecDeque<GridEntry>,
}

impl GridCell {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &GridEntry> {
        self.entries.iter()
    }
}

/// Grid tuning
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Bucket edge in degrees. Larger buckets raise recall and cost.
    pub bucket_degrees: f64,
    /// Maximum events per cell
    pub cell_capacity: usize,
    pub retention: RetentionPolicy,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            bucket_degrees: DEFAULT_BUCKET_DEGREES,
            cell_capacity: DEFAULT_CELL_CAPACITY,
            retention: RetentionPolicy::default(),
        }
    }
}

/// The spatial index
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    bucket_degrees: f64,
    cell_capacity: usize,
    retention: RetentionPolicy,

    /// Occupied cells
    cells: HashMap<CellKey, GridCell>,

    /// Event id -> cell currently holding it
    index: HashMap<String, CellKey>,

    min_lon_bucket: i32,
    lon_buckets: i32,
}

impl SpatialGrid {
    /// Create a new grid
    pub fn new(config: GridConfig) -> Result<Self, CoreError> {
        let bucket = config.bucket_degrees;
        if !bucket.is_finite() || bucket <= 0.0 || bucket > 90.0 {
            return Err(CoreError::InvalidBucket(bucket));
        }
        if config.cell_capacity == 0 {
            return Err(CoreError::InvalidCapacity(0));
        }

        let min_lon_bucket = (-180.0 / bucket).floor() as i32;
        let max_lon_bucket = ((180.0 - 1e-9) / bucket).floor() as i32;

        Ok(Self {
            bucket_degrees: bucket,
            cell_capacity: config.cell_capacity,
            retention: config.retention,
            cells: HashMap::new(),
            index: HashMap::new(),
            min_lon_bucket,
            lon_buckets: max_lon_bucket - min_lon_bucket + 1,
        })
    }

    pub fn bucket_degrees(&self) -> f64 {
        self.bucket_degrees
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Cell key for a coordinate
    pub fn cell_for(&self, lat: f64, lon: f64) -> CellKey {
        let lon = if lon >= 180.0 { lon - 360.0 } else { lon };
        CellKey {
            lat: (lat / self.bucket_degrees).floor() as i32,
            lon: (lon / self.bucket_degrees).floor() as i32,
        }
    }

    /// Geographic center of a cell
    pub fn cell_center(&self, key: CellKey) -> (f64, f64) {
        (
            (key.lat as f64 + 0.5) * self.bucket_degrees,
            (key.lon as f64 + 0.5) * self.bucket_degrees,
        )
    }

    /// Insert an event, superseding any stored event with the same id
    pub fn insert(&mut self, event: NormalizedEvent, now: DateTime<Utc>) -> CellKey {
        self.remove(&event.id);

        let key = self.cell_for(event.lat, event.lon);
        let id = event.id.clone();
        let cell = self.cells.entry(key).or_default();
        cell.entries.push_back(GridEntry {
            event: Arc::new(event),
            inserted_at: now,
        });

        let mut dropped = None;
        if cell.entries.len() > self.cell_capacity {
            dropped = cell.entries.pop_front();
        }

        self.index.insert(id, key);
        if let Some(entry) = dropped {
            self.index.remove(&entry.event.id);
        }
        key
    }

    /// Remove an event by id
    pub fn remove(&mut self, id: &str) -> Option<Arc<NormalizedEvent>> {
        let key = self.index.remove(id)?;
        let cell = self.cells.get_mut(&key)?;
        let pos = cell.entries.iter().position(|e| e.event.id == id)?;
        let entry = cell.entries.remove(pos);
        if cell.entries.is_empty() {
            self.cells.remove(&key);
        }
        entry.map(|e| e.event)
    }

    /// Live events in the cell containing (lat, lon) and every cell within
    /// Chebyshev distance `radius_cells` of it
    pub fn query_nearby(
        &self,
        lat: f64,
        lon: f64,
        radius_cells: u32,
        now: DateTime<Utc>,
    ) -> Vec<Arc<NormalizedEvent>> {
        self.query_cell(self.cell_for(lat, lon), radius_cells, now)
    }

    /// Same as `query_nearby` but starting from a known cell
    pub fn query_cell(
        &self,
        center: CellKey,
        radius_cells: u32,
        now: DateTime<Utc>,
    ) -> Vec<Arc<NormalizedEvent>> {
        let mut result = Vec::new();
        for key in self.neighbourhood(center, radius_cells) {
            if let Some(cell) = self.cells.get(&key) {
                result.extend(
                    cell.entries
                        .iter()
                        .filter(|e| self.retention.is_live(&e.event, now))
                        .map(|e| Arc::clone(&e.event)),
                );
            }
        }
        result
    }

    /// Live events of a single cell
    pub fn events_in_cell(&self, key: CellKey, now: DateTime<Utc>) -> Vec<Arc<NormalizedEvent>> {
        self.query_cell(key, 0, now)
    }

    /// Cells within Chebyshev distance `radius`, wrapping in longitude
    fn neighbourhood(&self, center: CellKey, radius: u32) -> Vec<CellKey> {
        // No neighbourhood is wider than the grid itself
        let r = radius.min(self.lon_buckets as u32) as i32;
        let max_lat_bucket = (90.0 / self.bucket_degrees).floor() as i32;
        let min_lat_bucket = (-90.0 / self.bucket_degrees).floor() as i32;
        let lon_span = r.min(self.lon_buckets / 2);

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for lat in (center.lat - r).max(min_lat_bucket)..=(center.lat + r).min(max_lat_bucket) {
            for d_lon in -lon_span..=lon_span {
                let lon = (center.lon + d_lon - self.min_lon_bucket).rem_euclid(self.lon_buckets)
                    + self.min_lon_bucket;
                let key = CellKey { lat, lon };
                if seen.insert(key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Drop every event of `kind` older than `max_age`. Returns the count.
    pub fn evict_older_than(&mut self, kind: SignalKind, max_age: Duration, now: DateTime<Utc>) -> usize {
        self.remove_where(|event| event.kind == kind && !event.is_within(max_age, now))
    }

    /// Drop every event of `kind`. Returns the count.
    pub fn remove_kind(&mut self, kind: SignalKind) -> usize {
        self.remove_where(|event| event.kind == kind)
    }

    fn remove_where<F>(&mut self, mut drop: F) -> usize
    where
        F: FnMut(&NormalizedEvent) -> bool,
    {
        let mut removed = Vec::new();
        for cell in self.cells.values_mut() {
            cell.entries.retain(|entry| {
                let keep = !drop(&entry.event);
                if !keep {
                    removed.push(entry.event.id.clone());
                }
                keep
            });
        }
        self.cells.retain(|_, cell| !cell.is_empty());
        for id in &removed {
            self.index.remove(id);
        }
        removed.len()
    }

    /// Evict every kind using the grid's retention policy
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        SignalKind::ALL
            .iter()
            .map(|kind| {
                let window = self.retention.window(*kind);
                self.evict_older_than(*kind, window, now)
            })
            .sum()
    }

    /// Occupied cells in a stable order
    pub fn occupied_cells(&self) -> Vec<CellKey> {
        let mut keys: Vec<_> = self.cells.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn cell(&self, key: CellKey) -> Option<&GridCell> {
        self.cells.get(&key)
    }

    /// Every live event, in cell order
    pub fn live_events(&self, now: DateTime<Utc>) -> Vec<Arc<NormalizedEvent>> {
        self.occupied_cells()
            .into_iter()
            .flat_map(|key| self.events_in_cell(key, now))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<NormalizedEvent>> {
        let key = self.index.get(id)?;
        self.cells
            .get(key)?
            .entries
            .iter()
            .find(|e| e.event.id == id)
            .map(|e| &e.event)
    }

    /// Count of stored events (live or not yet evicted)
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Get grid statistics
    pub fn stats(&self) -> GridStats {
        GridStats {
            occupied_cells: self.cells.len(),
            stored_events: self.index.len(),
            largest_cell: self.cells.values().map(|c| c.len()).max().unwrap_or(0),
        }
    }

    /// Clear all events (for testing)
    pub fn clear(&mut self) {
        self.cells.clear();
        self.index.clear();
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self {
            bucket_degrees: DEFAULT_BUCKET_DEGREES,
            cell_capacity: DEFAULT_CELL_CAPACITY,
            retention: RetentionPolicy::default(),
            cells: HashMap::new(),
            index: HashMap::new(),
            min_lon_bucket: (-180.0 / DEFAULT_BUCKET_DEGREES).floor() as i32,
            lon_buckets: (360.0 / DEFAULT_BUCKET_DEGREES).ceil() as i32,
        }
    }
}

/// Grid statistics
#[derive(Debug, Clone, Serialize)]
pub struct GridStats {
    pub occupied_cells: usize,
    pub stored_events: usize,
    pub largest_cell: usize,
}

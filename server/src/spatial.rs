//! Per-region point index
//!
//! A two-level table: region id to a point-keyed table. Each region has its own
//! lock, created lazily on first write, so activity in one region never
//! contends with another. Lookups in a region that was never written return
//! nothing and allocate nothing.

use shared::{Point, RegionId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

type RegionTable<V> = Arc<RwLock<HashMap<Point, V>>>;

pub struct SpatialIndex<V> {
    regions: RwLock<HashMap<RegionId, RegionTable<V>>>,
}

impl<V: Clone> SpatialIndex<V> {
    pub fn new() -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the region table if it exists, without creating it
    fn region(&self, region: RegionId) -> Option<RegionTable<V>> {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&region)
            .cloned()
    }

    /// Returns the region table, creating an empty one on first use
    fn region_or_create(&self, region: RegionId) -> RegionTable<V> {
        if let Some(table) = self.region(region) {
            return table;
        }

        let mut regions = self.regions.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(regions.entry(region).or_default())
    }

    /// Stores `value` at `point`, replacing whatever was there
    pub fn add(&self, region: RegionId, point: Point, value: V) {
        let table = self.region_or_create(region);
        let mut table = table.write().unwrap_or_else(PoisonError::into_inner);
        table.insert(point, value);
    }

    /// Stores a whole batch under a single acquisition of the region lock
    ///
    /// Readers observe either none or all of the batch.
    pub fn add_batch<I>(&self, region: RegionId, entries: I)
    where
        I: IntoIterator<Item = (Point, V)>,
    {
        let table = self.region_or_create(region);
        let mut table = table.write().unwrap_or_else(PoisonError::into_inner);
        table.extend(entries);
    }

    /// Swaps in a freshly built table for `region` in one step
    ///
    /// Used for (re)loading a region: readers see the old contents or the new
    /// ones, never a cleared or half-filled region in between.
    pub fn replace_region<I>(&self, region: RegionId, entries: I)
    where
        I: IntoIterator<Item = (Point, V)>,
    {
        let table: HashMap<Point, V> = entries.into_iter().collect();
        let mut regions = self.regions.write().unwrap_or_else(PoisonError::into_inner);
        regions.insert(region, Arc::new(RwLock::new(table)));
    }

    pub fn get(&self, region: RegionId, point: Point) -> Option<V> {
        let table = self.region(region)?;
        let table = table.read().unwrap_or_else(PoisonError::into_inner);
        table.get(&point).cloned()
    }

    pub fn contains(&self, region: RegionId, point: Point) -> bool {
        match self.region(region) {
            Some(table) => table
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&point),
            None => false,
        }
    }

    /// Stores `value` at `point` only if nothing is there yet
    pub fn insert_if_vacant(&self, region: RegionId, point: Point, value: V) -> bool {
        let table = self.region_or_create(region);
        let mut table = table.write().unwrap_or_else(PoisonError::into_inner);
        if table.contains_key(&point) {
            return false;
        }
        table.insert(point, value);
        true
    }

    /// Removes one point and returns its value
    pub fn remove(&self, region: RegionId, point: Point) -> Option<V> {
        let table = self.region(region)?;
        let mut table = table.write().unwrap_or_else(PoisonError::into_inner);
        table.remove(&point)
    }

    /// Removes `point` only if it currently holds a value equal to `expected`
    pub fn remove_if_eq(&self, region: RegionId, point: Point, expected: &V) -> bool
    where
        V: PartialEq,
    {
        let Some(table) = self.region(region) else {
            return false;
        };
        let mut table = table.write().unwrap_or_else(PoisonError::into_inner);
        if table.get(&point) == Some(expected) {
            table.remove(&point);
            true
        } else {
            false
        }
    }

    /// Discards the whole region sub-table
    pub fn clear(&self, region: RegionId) -> bool {
        self.regions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&region)
            .is_some()
    }

    /// Snapshot-then-iterate over one region; no lock is held while `f` runs
    pub fn for_each<F>(&self, region: RegionId, mut f: F)
    where
        F: FnMut(Point, &V),
    {
        let snapshot: Vec<(Point, V)> = match self.region(region) {
            Some(table) => table
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(point, value)| (*point, value.clone()))
                .collect(),
            None => return,
        };

        for (point, value) in snapshot {
            f(point, &value);
        }
    }

    /// Ids of every region that currently has a sub-table, in ascending order
    pub fn regions(&self) -> Vec<RegionId> {
        let mut ids: Vec<RegionId> = self
            .regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn has_region(&self, region: RegionId) -> bool {
        self.region(region).is_some()
    }

    pub fn region_len(&self, region: RegionId) -> usize {
        self.region(region)
            .map(|table| table.read().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }
}

impl<V: Clone> Default for SpatialIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn row(y: i32, len: i32) -> Vec<(Point, ())> {
        (0..len).map(|x| (Point::new(x, y), ())).collect()
    }

    #[test]
    fn test_add_batch_then_contains() {
        let index = SpatialIndex::new();
        index.add_batch(1, row(0, 300));

        for x in 0..300 {
            assert!(index.contains(1, Point::new(x, 0)));
        }
        assert!(!index.contains(1, Point::new(300, 0)));
        assert!(!index.contains(1, Point::new(0, 1)));
        assert!(!index.contains(2, Point::new(0, 0)));
    }

    #[test]
    fn test_clear_removes_every_point() {
        let index = SpatialIndex::new();
        index.add_batch(4, row(2, 10));
        index.add(5, Point::new(0, 0), ());

        assert!(index.clear(4));
        for x in 0..10 {
            assert!(!index.contains(4, Point::new(x, 2)));
        }
        assert!(index.contains(5, Point::new(0, 0)));
        assert!(!index.clear(4));
    }

    #[test]
    fn test_reads_do_not_create_regions() {
        let index: SpatialIndex<u64> = SpatialIndex::new();
        index.add(1, Point::new(1, 1), 7);

        assert_eq!(index.get(9, Point::new(1, 1)), None);
        assert!(!index.contains(9, Point::new(1, 1)));
        assert_eq!(index.remove(9, Point::new(1, 1)), None);

        let mut visited = 0;
        index.for_each(9, |_, _| visited += 1);
        assert_eq!(visited, 0);

        assert_eq!(index.regions(), vec![1]);
    }

    #[test]
    fn test_point_holds_one_value() {
        let index = SpatialIndex::new();
        let p = Point::new(3, 3);
        index.add(0, p, "first");
        index.add(0, p, "second");

        assert_eq!(index.get(0, p), Some("second"));
        assert_eq!(index.region_len(0), 1);
    }

    #[test]
    fn test_remove_if_eq() {
        let index = SpatialIndex::new();
        let p = Point::new(0, 0);
        index.add(0, p, 11u64);

        assert!(!index.remove_if_eq(0, p, &12));
        assert!(index.contains(0, p));
        assert!(index.remove_if_eq(0, p, &11));
        assert!(!index.contains(0, p));
    }

    #[test]
    fn test_insert_if_vacant() {
        let index = SpatialIndex::new();
        let p = Point::new(3, 3);

        assert!(!index.has_region(2));
        assert!(index.insert_if_vacant(2, p, 1u64));
        assert!(!index.insert_if_vacant(2, p, 2u64));
        assert_eq!(index.get(2, p), Some(1));
        assert!(index.has_region(2));
    }

    #[test]
    fn test_replace_region_swaps_contents() {
        let index = SpatialIndex::new();
        index.add_batch(0, row(0, 5));
        index.replace_region(0, row(1, 3));

        assert!(!index.contains(0, Point::new(0, 0)));
        assert!(index.contains(0, Point::new(2, 1)));
        assert_eq!(index.region_len(0), 3);
    }

    #[test]
    fn test_for_each_allows_mutation() {
        let index = SpatialIndex::new();
        index.add_batch(3, row(0, 4));

        index.for_each(3, |point, _| {
            index.remove(3, point);
        });
        assert_eq!(index.region_len(3), 0);
    }

    #[test]
    fn test_readers_never_see_partial_batch() {
        let index = Arc::new(SpatialIndex::new());
        let batch = 500;

        let reader = {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let len = index.region_len(7);
                    assert!(len == 0 || len == batch as usize, "saw {} points", len);
                }
            })
        };

        for _ in 0..20 {
            index.replace_region(7, row(0, batch));
            index.clear(7);
            index.add_batch(7, row(0, batch));
            index.clear(7);
        }

        reader.join().unwrap();
    }
}

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::domain::controller_model::utils::interval::Interval;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry<V> {
    pub interval: Interval,
    pub value: V,
}

/// Reason why an interval could not be added to an [`IntervalIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexConflict<V> {
    EmptyInterval,
    DuplicateValue,
    /// Values whose intervals overlap the rejected interval.
    Overlap(Vec<V>),
}

/// Ordered set of **non-overlapping** intervals, each bound to one value.
///
/// Entries are keyed by their start instant. Since stored intervals never overlap, ordering by start
/// is also ordering by end, so an overlap lookup only has to look at the last entry starting before the
/// query and the entries starting inside it: **O(log n + k)**.
#[derive(Debug, Clone)]
pub struct IntervalIndex<V> {
    by_start: BTreeMap<DateTime<Utc>, IndexEntry<V>>,
    start_by_value: HashMap<V, DateTime<Utc>>,
}

impl<V> Default for IntervalIndex<V> {
    fn default() -> Self {
        IntervalIndex { by_start: BTreeMap::new(), start_by_value: HashMap::new() }
    }
}

impl<V: Clone + Eq + Hash> IntervalIndex<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry<V>> {
        self.by_start.values()
    }

    pub fn get(&self, value: &V) -> Option<Interval> {
        let start = self.start_by_value.get(value)?;
        self.by_start.get(start).map(|entry| entry.interval)
    }

    /// All entries overlapping `interval`, ordered by start.
    pub fn overlapping(&self, interval: &Interval) -> Vec<&IndexEntry<V>> {
        let mut result = Vec::new();
        if interval.is_empty() {
            return result;
        }

        if let Some((_, entry)) = self.by_start.range(..interval.start).next_back() {
            if entry.interval.end > interval.start {
                result.push(entry);
            }
        }
        result.extend(self.by_start.range(interval.start..interval.end).map(|(_, entry)| entry));

        return result;
    }

    pub fn is_free(&self, interval: &Interval) -> bool {
        self.overlapping(interval).is_empty()
    }

    /// True if every entry overlapping `interval` is accepted by `ignore`.
    pub fn is_free_ignoring<F: Fn(&V) -> bool>(&self, interval: &Interval, ignore: F) -> bool {
        self.overlapping(interval).iter().all(|entry| ignore(&entry.value))
    }

    pub fn insert(&mut self, interval: Interval, value: V) -> Result<(), IndexConflict<V>> {
        if interval.is_empty() {
            return Err(IndexConflict::EmptyInterval);
        }
        if self.start_by_value.contains_key(&value) {
            return Err(IndexConflict::DuplicateValue);
        }

        let holders: Vec<V> = self.overlapping(&interval).into_iter().map(|entry| entry.value.clone()).collect();
        if !holders.is_empty() {
            return Err(IndexConflict::Overlap(holders));
        }

        self.start_by_value.insert(value.clone(), interval.start);
        self.by_start.insert(interval.start, IndexEntry { interval, value });
        Ok(())
    }

    pub fn remove(&mut self, value: &V) -> Option<Interval> {
        let start = self.start_by_value.remove(value)?;
        self.by_start.remove(&start).map(|entry| entry.interval)
    }

    /// Shortens the interval of `value` so that it ends at `new_end`. An interval which would become
    /// empty is removed. Returns the remaining interval.
    pub fn truncate(&mut self, value: &V, new_end: DateTime<Utc>) -> Option<Interval> {
        let start = *self.start_by_value.get(value)?;
        if new_end <= start {
            self.remove(value);
            return None;
        }

        let entry = self.by_start.get_mut(&start)?;
        if new_end < entry.interval.end {
            entry.interval.end = new_end;
        }
        Some(entry.interval)
    }

    /// Drops every entry which ends at or before `time` and returns the dropped values.
    pub fn prune_ending_before(&mut self, time: DateTime<Utc>) -> Vec<V> {
        let expired: Vec<DateTime<Utc>> =
            self.by_start.iter().take_while(|(_, entry)| entry.interval.end <= time).map(|(start, _)| *start).collect();

        let mut removed = Vec::with_capacity(expired.len());
        for start in expired {
            if let Some(entry) = self.by_start.remove(&start) {
                self.start_by_value.remove(&entry.value);
                removed.push(entry.value);
            }
        }
        removed
    }
}

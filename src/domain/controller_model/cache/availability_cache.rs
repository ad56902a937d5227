use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

use crate::domain::controller_model::cache::interval_index::{IndexConflict, IntervalIndex};
use crate::domain::controller_model::cache::resource_unit::ResourceUnit;
use crate::domain::controller_model::reservation::reservation::ReservationId;
use crate::domain::controller_model::utils::interval::Interval;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AvailabilityError {
    #[error("{unit} is already allocated in {interval} (held by {holders:?})")]
    Conflict { unit: ResourceUnit, interval: Interval, holders: Vec<ReservationId> },

    #[error("{unit} cannot be allocated for the empty interval {interval}")]
    EmptyInterval { unit: ResourceUnit, interval: Interval },

    #[error("{reservation:?} already holds {unit}")]
    AlreadyHeld { unit: ResourceUnit, reservation: ReservationId },
}

/// In-memory index of which resource unit is held by which reservation over which interval.
///
/// The cache is the only place where availability is decided. Every unit has its own
/// [`IntervalIndex`], so two reservations holding the same unit can never overlap. Entries which end
/// before the **working start** are pruned and no longer taken into account.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityCache {
    units: HashMap<ResourceUnit, IntervalIndex<ReservationId>>,
    units_by_reservation: HashMap<ReservationId, BTreeSet<ResourceUnit>>,
    working_start: Option<DateTime<Utc>>,
}

impl AvailabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn working_start(&self) -> Option<DateTime<Utc>> {
        self.working_start
    }

    pub fn is_available(&self, unit: &ResourceUnit, interval: &Interval) -> bool {
        self.units.get(unit).map_or(true, |index| index.is_free(interval))
    }

    /// Like [`is_available`](Self::is_available) but entries held by one of the `ignored` reservations
    /// do not count.
    pub fn is_available_ignoring(&self, unit: &ResourceUnit, interval: &Interval, ignored: &HashSet<ReservationId>) -> bool {
        self.units.get(unit).map_or(true, |index| index.is_free_ignoring(interval, |holder| ignored.contains(holder)))
    }

    /// Reservations holding `unit` somewhere inside `interval`.
    pub fn query(&self, unit: &ResourceUnit, interval: &Interval) -> Vec<ReservationId> {
        self.units.get(unit).map(|index| index.overlapping(interval).into_iter().map(|entry| entry.value).collect()).unwrap_or_default()
    }

    pub fn units_of(&self, reservation: ReservationId) -> Vec<ResourceUnit> {
        self.units_by_reservation.get(&reservation).map(|units| units.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn reserve(&mut self, unit: ResourceUnit, interval: Interval, reservation: ReservationId) -> Result<(), AvailabilityError> {
        let index = self.units.entry(unit.clone()).or_default();

        match index.insert(interval, reservation) {
            Ok(()) => {
                self.units_by_reservation.entry(reservation).or_default().insert(unit);
                Ok(())
            }
            Err(IndexConflict::EmptyInterval) => Err(AvailabilityError::EmptyInterval { unit, interval }),
            Err(IndexConflict::DuplicateValue) => Err(AvailabilityError::AlreadyHeld { unit, reservation }),
            Err(IndexConflict::Overlap(holders)) => Err(AvailabilityError::Conflict { unit, interval, holders }),
        }
    }

    pub fn release(&mut self, unit: &ResourceUnit, reservation: ReservationId) -> bool {
        let removed = self.units.get_mut(unit).and_then(|index| index.remove(&reservation)).is_some();

        if let Some(units) = self.units_by_reservation.get_mut(&reservation) {
            units.remove(unit);
            if units.is_empty() {
                self.units_by_reservation.remove(&reservation);
            }
        }
        removed
    }

    /// Releases every unit held by `reservation`. Returns the number of released entries.
    pub fn release_all(&mut self, reservation: ReservationId) -> usize {
        let units = self.units_by_reservation.remove(&reservation).unwrap_or_default();

        let mut released = 0;
        for unit in units {
            if let Some(index) = self.units.get_mut(&unit) {
                if index.remove(&reservation).is_some() {
                    released += 1;
                }
            }
        }
        released
    }

    /// Shortens every entry of `reservation` so that it ends at `new_end`.
    pub fn truncate(&mut self, reservation: ReservationId, new_end: DateTime<Utc>) {
        let Some(units) = self.units_by_reservation.get(&reservation).cloned() else {
            return;
        };

        for unit in units {
            let remaining = self.units.get_mut(&unit).and_then(|index| index.truncate(&reservation, new_end));
            if remaining.is_none() {
                if let Some(held) = self.units_by_reservation.get_mut(&reservation) {
                    held.remove(&unit);
                }
            }
        }

        if self.units_by_reservation.get(&reservation).is_some_and(|held| held.is_empty()) {
            self.units_by_reservation.remove(&reservation);
        }
    }

    /// Slides the working window forward. Entries ending at or before `start` are dropped.
    pub fn set_working_start(&mut self, start: DateTime<Utc>) -> usize {
        if self.working_start.is_some_and(|current| current >= start) {
            return 0;
        }
        self.working_start = Some(start);

        let mut pruned = 0;
        for (unit, index) in self.units.iter_mut() {
            for reservation in index.prune_ending_before(start) {
                pruned += 1;
                if let Some(held) = self.units_by_reservation.get_mut(&reservation) {
                    held.remove(unit);
                }
            }
        }
        self.units.retain(|_, index| !index.is_empty());
        self.units_by_reservation.retain(|_, held| !held.is_empty());

        log::debug!("Availability cache working start moved to {}, {} expired entries pruned.", start, pruned);
        pruned
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half open time interval **[start, end)**.
///
/// All reservations, availability entries and executables are scoped by an `Interval`. Two intervals
/// which only touch (`a.end == b.start`) do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Interval { start, end }
    }

    /// Returns `None` if `end` lies before `start`.
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        if end < start {
            return None;
        }
        Some(Interval { start, end })
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }

    /// True if `other` lies completely within `self`.
    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_instant(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Common part of both intervals, `None` if they do not overlap.
    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Interval { start: self.start.max(other.start), end: self.end.min(other.end) })
    }

    /// Smallest interval covering both.
    pub fn hull(&self, other: &Interval) -> Interval {
        Interval { start: self.start.min(other.start), end: self.end.max(other.end) }
    }

    /// Moves the start forward to `minimum` if it lies before it.
    pub fn clip_start(&self, minimum: DateTime<Utc>) -> Interval {
        Interval { start: self.start.max(minimum), end: self.end }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.format("%Y-%m-%d %H:%M"), self.end.format("%Y-%m-%d %H:%M"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_touching_intervals_do_not_overlap() {
        let a = Interval::new(at(10), at(12));
        let b = Interval::new(at(12), at(14));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&Interval::new(at(11), at(13))));
    }

    #[test]
    fn test_empty_interval_never_overlaps() {
        let empty = Interval::new(at(11), at(11));
        assert!(empty.is_empty());
        assert!(!empty.overlaps(&Interval::new(at(10), at(12))));
    }

    #[test]
    fn test_contains_and_intersection() {
        let outer = Interval::new(at(8), at(16));
        let inner = Interval::new(at(10), at(12));
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert_eq!(outer.intersection(&Interval::new(at(14), at(18))), Some(Interval::new(at(14), at(16))));
        assert_eq!(inner.intersection(&Interval::new(at(12), at(13))), None);
    }

    #[test]
    fn test_clip_start_and_hull() {
        let slot = Interval::new(at(10), at(14));
        assert_eq!(slot.clip_start(at(11)), Interval::new(at(11), at(14)));
        assert_eq!(slot.clip_start(at(9)), slot);
        assert_eq!(slot.hull(&Interval::new(at(13), at(15))), Interval::new(at(10), at(15)));
    }
}

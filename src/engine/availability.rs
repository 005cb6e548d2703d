use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Outcome of checking a candidate range against a group's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// The chronologically first candidate day whose approved occupancy
    /// already meets or exceeds the quota.
    Blocked { date: NaiveDate },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Tally approved occupancy per day within `window`.
///
/// Each approved booking is expanded into the days it covers (clamped to
/// the window) and counted once per covered day. Pending and rejected
/// records never contribute; records with a non-positive duration cover
/// no days and so contribute nothing.
pub fn occupancy(group: &GroupState, window: &DateSpan) -> BTreeMap<NaiveDate, u32> {
    let mut counts: BTreeMap<NaiveDate, u32> = BTreeMap::new();
    if window.duration_days <= 0 {
        return counts;
    }
    let window_end = window.end_exclusive();
    for record in group.overlapping(window) {
        if record.status != BookingStatus::Approved {
            continue;
        }
        let from = record.span.start.max(window.start);
        let to = record.span.end_exclusive().min(window_end);
        for day in from.iter_days().take_while(|d| *d < to) {
            *counts.entry(day).or_insert(0) += 1;
        }
    }
    counts
}

/// First candidate day whose existing count is at or over quota.
/// A day at exactly `quota` blocks; `quota - 1` is the last acceptable
/// occupancy before blocking.
pub fn first_conflict(
    candidate: &DateSpan,
    counts: &BTreeMap<NaiveDate, u32>,
    quota: u32,
) -> Option<NaiveDate> {
    candidate
        .days()
        .find(|day| counts.get(day).copied().unwrap_or(0) >= quota)
}

/// Can `candidate` be booked in `group` without landing on a day that is
/// already at quota? Pure: one pass over the group's records, no mutation.
/// A non-positive candidate duration covers no days and passes trivially.
pub fn check(group: &GroupState, candidate: &DateSpan, quota: u32) -> Availability {
    if candidate.duration_days <= 0 {
        return Availability::Available;
    }
    let counts = occupancy(group, candidate);
    match first_conflict(candidate, &counts, quota) {
        Some(date) => Availability::Blocked { date },
        None => Availability::Available,
    }
}

/// All days in `window` that are at or over quota, in chronological
/// order. This is the calendar-rendering variant of [`check`]: the same
/// occupancy map, filtered instead of short-circuited.
pub fn blocked_days(group: &GroupState, window: &DateSpan, quota: u32) -> Vec<NaiveDate> {
    let counts = occupancy(group, window);
    window
        .days()
        .filter(|day| counts.get(day).copied().unwrap_or(0) >= quota)
        .collect()
}

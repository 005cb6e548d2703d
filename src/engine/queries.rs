use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::availability::{self, Availability};
use super::{Engine, EngineError};

impl Engine {
    /// Can `span` be booked in `group` without landing on a day that is
    /// already at quota? Pure read over the group's approved records.
    ///
    /// A store failure surfaces as `Err` — callers must never conflate it
    /// with a `Blocked` verdict. An unknown group is trivially available,
    /// and a non-positive duration covers no days and passes.
    pub async fn check_availability(
        &self,
        group: &str,
        span: DateSpan,
    ) -> Result<Availability, EngineError> {
        if span.duration_days > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let gs = match self.get_group(group) {
            Some(gs) => gs,
            None => return Ok(Availability::Available),
        };
        let guard = gs.read().await;
        let quota = self.quota_of(&guard);
        Ok(availability::check(&guard, &span, quota))
    }

    /// All days in `[from, to]` (inclusive) that are at or over quota —
    /// what a calendar UI greys out before the user picks a range.
    pub async fn blocked_days(
        &self,
        group: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        if to < from {
            return Err(EngineError::LimitExceeded("query window ends before it starts"));
        }
        let width = (to - from).num_days() + 1;
        if width > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let gs = match self.get_group(group) {
            Some(gs) => gs,
            None => return Ok(Vec::new()),
        };
        let guard = gs.read().await;
        let quota = self.quota_of(&guard);
        let window = DateSpan::new(from, width);
        Ok(availability::blocked_days(&guard, &window, quota))
    }

    pub fn list_groups(&self) -> Vec<GroupInfo> {
        self.groups
            .iter()
            .map(|entry| {
                let gs = entry.value().clone();
                let guard = gs.try_read().expect("list_groups: uncontended read");
                GroupInfo {
                    name: guard.name.clone(),
                    quota: self.quota_of(&guard),
                    explicit: guard.quota_override.is_some(),
                }
            })
            .collect()
    }

    pub async fn list_bookings(
        &self,
        group: &str,
        status: Option<BookingStatus>,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let gs = match self.get_group(group) {
            Some(gs) => gs,
            None => return Ok(vec![]),
        };
        let guard = gs.read().await;
        Ok(guard
            .bookings
            .iter()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .map(|b| BookingInfo {
                id: b.id,
                group: guard.name.clone(),
                start_date: b.span.start,
                duration_days: b.span.duration_days,
                status: b.status,
                label: b.label.clone(),
            })
            .collect())
    }
}

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A run of consecutive calendar days: `[start, start + duration_days)`,
/// inclusive of the start date. Day buckets are civil calendar dates —
/// no time-of-day, no timezone — so the same booking always lands in the
/// same `YYYY-MM-DD` buckets regardless of where the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub duration_days: i64,
}

impl DateSpan {
    pub fn new(start: NaiveDate, duration_days: i64) -> Self {
        Self { start, duration_days }
    }

    /// First day after the span. A non-positive duration yields the start
    /// date itself (an empty span).
    pub fn end_exclusive(&self) -> NaiveDate {
        if self.duration_days <= 0 {
            return self.start;
        }
        self.start
            .checked_add_days(Days::new(self.duration_days as u64))
            .unwrap_or(NaiveDate::MAX)
    }

    /// The covered days in chronological order. Empty for non-positive
    /// durations.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start
            .iter_days()
            .take(self.duration_days.max(0) as usize)
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start < other.end_exclusive() && other.start < self.end_exclusive()
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end_exclusive()
    }
}

/// Canonical wire/bucket form of a calendar day: zero-padded `YYYY-MM-DD`
/// built from civil fields. Used uniformly for stored-record expansion,
/// candidate expansion, and every row that crosses the wire.
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Review state of a booking. Only `Approved` records count toward
/// occupancy; the filter is applied at read time, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "approved" => Ok(BookingStatus::Approved),
            "rejected" => Ok(BookingStatus::Rejected),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request to occupy a resource group for a span of days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Ulid,
    pub span: DateSpan,
    pub status: BookingStatus,
    /// Free-text annotation (applicant, purpose).
    pub label: Option<String>,
}

/// All bookings competing in one capacity pool, kept sorted by start date.
/// The quota override is the group's entry in the quota lookup table;
/// groups without one use the service default.
#[derive(Debug, Clone)]
pub struct GroupState {
    pub name: String,
    pub quota_override: Option<u32>,
    /// Sorted by `span.start`.
    pub bookings: Vec<BookingRecord>,
}

impl GroupState {
    pub fn new(name: String, quota_override: Option<u32>) -> Self {
        Self {
            name,
            quota_override,
            bookings: Vec::new(),
        }
    }

    /// Insert keeping sort order by start date.
    pub fn insert_booking(&mut self, record: BookingRecord) {
        let pos = self
            .bookings
            .binary_search_by_key(&record.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, record);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<BookingRecord> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn booking(&self, id: &Ulid) -> Option<&BookingRecord> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut BookingRecord> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Only bookings whose span overlaps the window. Binary search skips
    /// everything starting at or after the window's end.
    pub fn overlapping(&self, window: &DateSpan) -> impl Iterator<Item = &BookingRecord> {
        let end = window.end_exclusive();
        let right_bound = self.bookings.partition_point(|b| b.span.start < end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end_exclusive() > window.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    GroupCreated {
        name: String,
        quota: u32,
    },
    GroupUpdated {
        name: String,
        quota: u32,
    },
    GroupDeleted {
        name: String,
    },
    BookingSubmitted {
        id: Ulid,
        group: String,
        start_date: NaiveDate,
        duration_days: i64,
        label: Option<String>,
    },
    BookingApproved {
        id: Ulid,
        group: String,
    },
    BookingRejected {
        id: Ulid,
        group: String,
    },
    BookingCancelled {
        id: Ulid,
        group: String,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    /// Effective quota (override or service default).
    pub quota: u32,
    /// Whether the quota comes from an explicit override.
    pub explicit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub group: String,
    pub start_date: NaiveDate,
    pub duration_days: i64,
    pub status: BookingStatus,
    pub label: Option<String>,
}

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    GroupNotFound(String),
    GroupExists(String),
    /// The blocked outcome of a mutation path: names the group and the
    /// first conflicting day. Never used for store failures.
    QuotaExceeded { group: String, date: NaiveDate },
    InvalidTransition { id: Ulid, from: BookingStatus },
    HasBookings(String),
    InvalidDuration(i64),
    LimitExceeded(&'static str),
    /// Durable-store failure. Distinct from any quota outcome: callers
    /// must never read this as "blocked".
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "booking already exists: {id}"),
            EngineError::GroupNotFound(name) => write!(f, "group not found: {name}"),
            EngineError::GroupExists(name) => {
                write!(f, "group already has a quota: {name}")
            }
            EngineError::QuotaExceeded { group, date } => {
                write!(f, "group {group} is full on {}", crate::model::day_key(*date))
            }
            EngineError::InvalidTransition { id, from } => {
                write!(f, "booking {id} is {from}, only pending bookings can be reviewed")
            }
            EngineError::HasBookings(name) => {
                write!(f, "cannot delete group {name}: it has bookings")
            }
            EngineError::InvalidDuration(days) => {
                write!(f, "booking duration must be at least 1 day, got {days}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

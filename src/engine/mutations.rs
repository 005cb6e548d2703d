use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::Availability;
use super::validate::{validate_group_name, validate_label, validate_span};
use super::{Engine, EngineError, WalCommand, availability};

impl Engine {
    /// Register an explicit quota override for a group. Groups that were
    /// only materialized implicitly (by a booking) may be registered once;
    /// re-registering an explicit override is an error — use
    /// [`Engine::update_group_quota`] to change it.
    pub async fn set_group_quota(&self, name: &str, quota: u32) -> Result<(), EngineError> {
        validate_group_name(name)?;
        let gs = self.get_or_create_group(name)?;
        let mut guard = gs.write().await;
        if guard.quota_override.is_some() {
            return Err(EngineError::GroupExists(name.to_string()));
        }

        let event = Event::GroupCreated {
            name: name.to_string(),
            quota,
        };
        self.persist_and_apply(name, &mut guard, &event).await
    }

    pub async fn update_group_quota(&self, name: &str, quota: u32) -> Result<(), EngineError> {
        let gs = self
            .get_group(name)
            .ok_or_else(|| EngineError::GroupNotFound(name.to_string()))?;
        let mut guard = gs.write().await;

        let event = Event::GroupUpdated {
            name: name.to_string(),
            quota,
        };
        self.persist_and_apply(name, &mut guard, &event).await
    }

    /// Remove a group and its quota override. Refused while any booking
    /// (in any state) still references it.
    pub async fn delete_group(&self, name: &str) -> Result<(), EngineError> {
        let gs = self
            .get_group(name)
            .ok_or_else(|| EngineError::GroupNotFound(name.to_string()))?;
        let guard = gs.read().await;
        if !guard.bookings.is_empty() {
            return Err(EngineError::HasBookings(name.to_string()));
        }
        drop(guard);

        let event = Event::GroupDeleted {
            name: name.to_string(),
        };
        self.wal_append(&event).await?;
        self.groups.remove(name);
        self.notify.send(name, &event);
        self.notify.remove(name);
        Ok(())
    }

    /// Submit a booking request. The candidate range is checked against
    /// currently-approved records only — pending submissions reserve no
    /// capacity — and the new record enters in `pending` state.
    pub async fn submit_booking(
        &self,
        id: Ulid,
        group: &str,
        span: DateSpan,
        label: Option<String>,
    ) -> Result<(), EngineError> {
        validate_group_name(group)?;
        validate_span(&span)?;
        validate_label(label.as_deref())?;
        if self.booking_to_group.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let gs = self.get_or_create_group(group)?;
        let mut guard = gs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_GROUP {
            return Err(EngineError::LimitExceeded("too many bookings in group"));
        }

        let quota = self.quota_of(&guard);
        if let Availability::Blocked { date } = availability::check(&guard, &span, quota) {
            return Err(EngineError::QuotaExceeded {
                group: group.to_string(),
                date,
            });
        }

        let event = Event::BookingSubmitted {
            id,
            group: group.to_string(),
            start_date: span.start,
            duration_days: span.duration_days,
            label,
        };
        self.persist_and_apply(group, &mut guard, &event).await
    }

    /// pending → approved. The quota check runs again here, against
    /// approved records as of now: concurrent submissions can all pass the
    /// submission-time check (none of them reserves capacity), so approval
    /// is where the per-day ceiling is actually enforced.
    pub async fn approve_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (group, mut guard) = self.resolve_booking_write(&id).await?;
        let (status, span) = match guard.booking(&id) {
            Some(b) => (b.status, b.span),
            None => return Err(EngineError::NotFound(id)),
        };
        if status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition { id, from: status });
        }

        let quota = self.quota_of(&guard);
        if let Availability::Blocked { date } = availability::check(&guard, &span, quota) {
            return Err(EngineError::QuotaExceeded { group, date });
        }

        let event = Event::BookingApproved {
            id,
            group: group.clone(),
        };
        self.persist_and_apply(&group, &mut guard, &event).await
    }

    /// pending → rejected. No quota involvement.
    pub async fn reject_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (group, mut guard) = self.resolve_booking_write(&id).await?;
        let status = match guard.booking(&id) {
            Some(b) => b.status,
            None => return Err(EngineError::NotFound(id)),
        };
        if status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition { id, from: status });
        }

        let event = Event::BookingRejected {
            id,
            group: group.clone(),
        };
        self.persist_and_apply(&group, &mut guard, &event).await
    }

    /// Withdraw a booking in any state. Cancelling an approved booking
    /// frees its days on the next check.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (group, mut guard) = self.resolve_booking_write(&id).await?;
        if guard.booking(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::BookingCancelled {
            id,
            group: group.clone(),
        };
        self.persist_and_apply(&group, &mut guard, &event).await
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let names: Vec<String> = self.groups.iter().map(|e| e.key().clone()).collect();
        for name in names {
            let entry = match self.groups.get(&name) {
                Some(e) => e,
                None => continue,
            };
            let gs = entry.value().clone();
            let guard = gs.try_read().expect("compact: uncontended read");

            if let Some(quota) = guard.quota_override {
                events.push(Event::GroupCreated {
                    name: guard.name.clone(),
                    quota,
                });
            }

            for booking in &guard.bookings {
                events.push(Event::BookingSubmitted {
                    id: booking.id,
                    group: guard.name.clone(),
                    start_date: booking.span.start,
                    duration_days: booking.span.duration_days,
                    label: booking.label.clone(),
                });
                match booking.status {
                    BookingStatus::Pending => {}
                    BookingStatus::Approved => events.push(Event::BookingApproved {
                        id: booking.id,
                        group: guard.name.clone(),
                    }),
                    BookingStatus::Rejected => events.push(Event::BookingRejected {
                        id: booking.id,
                        group: guard.name.clone(),
                    }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

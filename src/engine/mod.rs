mod availability;
mod error;
mod mutations;
mod queries;
mod validate;

pub use availability::{Availability, blocked_days, check, first_conflict, occupancy};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedGroupState = Arc<RwLock<GroupState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One tenant's booking state: per-group records behind async RwLocks,
/// a reverse index from booking id to group, and the WAL writer handle.
pub struct Engine {
    pub groups: DashMap<String, SharedGroupState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → group name.
    pub(super) booking_to_group: DashMap<Ulid, String>,
    default_quota: u32,
}

/// Apply an event directly to a GroupState (no locking — caller holds the lock).
fn apply_to_group(gs: &mut GroupState, event: &Event, index: &DashMap<Ulid, String>) {
    match event {
        Event::BookingSubmitted {
            id,
            group,
            start_date,
            duration_days,
            label,
        } => {
            if *duration_days < 1 {
                tracing::warn!(
                    booking = %id,
                    group = %group,
                    duration_days,
                    "stored booking has a non-positive duration; it will never count toward occupancy"
                );
            }
            gs.insert_booking(BookingRecord {
                id: *id,
                span: DateSpan::new(*start_date, *duration_days),
                status: BookingStatus::Pending,
                label: label.clone(),
            });
            index.insert(*id, group.clone());
        }
        Event::BookingApproved { id, .. } => {
            if let Some(b) = gs.booking_mut(id) {
                b.status = BookingStatus::Approved;
            }
        }
        Event::BookingRejected { id, .. } => {
            if let Some(b) = gs.booking_mut(id) {
                b.status = BookingStatus::Rejected;
            }
        }
        Event::BookingCancelled { id, .. } => {
            gs.remove_booking(*id);
            index.remove(id);
        }
        Event::GroupCreated { quota, .. } | Event::GroupUpdated { quota, .. } => {
            gs.quota_override = Some(*quota);
        }
        // GroupDeleted is handled at the DashMap level, not here
        Event::GroupDeleted { .. } => {}
    }
}

/// The group a non-delete event belongs to.
fn event_group(event: &Event) -> &str {
    match event {
        Event::GroupCreated { name, .. }
        | Event::GroupUpdated { name, .. }
        | Event::GroupDeleted { name } => name,
        Event::BookingSubmitted { group, .. }
        | Event::BookingApproved { group, .. }
        | Event::BookingRejected { group, .. }
        | Event::BookingCancelled { group, .. } => group,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        default_quota: u32,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            groups: DashMap::new(),
            wal_tx,
            notify,
            booking_to_group: DashMap::new(),
            default_quota,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant
        // creation).
        for event in &events {
            if let Event::GroupDeleted { name } = event {
                engine.groups.remove(name);
                continue;
            }
            let group = event_group(event);
            let gs = engine
                .groups
                .entry(group.to_string())
                .or_insert_with(|| {
                    Arc::new(RwLock::new(GroupState::new(group.to_string(), None)))
                })
                .value()
                .clone();
            let mut guard = gs.try_write().expect("replay: uncontended write");
            apply_to_group(&mut guard, event, &engine.booking_to_group);
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_group(&self, name: &str) -> Option<SharedGroupState> {
        self.groups.get(name).map(|e| e.value().clone())
    }

    /// Lazily materialize a group: groups are just string keys until
    /// something (a booking, a quota override) touches them.
    pub(super) fn get_or_create_group(&self, name: &str) -> Result<SharedGroupState, EngineError> {
        if let Some(gs) = self.groups.get(name) {
            return Ok(gs.value().clone());
        }
        if self.groups.len() >= MAX_GROUPS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many groups"));
        }
        let entry = self
            .groups
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(GroupState::new(name.to_string(), None))));
        Ok(entry.value().clone())
    }

    pub fn group_for_booking(&self, id: &Ulid) -> Option<String> {
        self.booking_to_group.get(id).map(|e| e.value().clone())
    }

    /// Effective quota: the group's override, or the service default.
    pub fn quota_of(&self, gs: &GroupState) -> u32 {
        gs.quota_override.unwrap_or(self.default_quota)
    }

    pub fn default_quota(&self) -> u32 {
        self.default_quota
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        group: &str,
        gs: &mut GroupState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_group(gs, event, &self.booking_to_group);
        self.notify.send(group, event);
        Ok(())
    }

    /// Lookup booking → group, get group, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        id: &Ulid,
    ) -> Result<(String, tokio::sync::OwnedRwLockWriteGuard<GroupState>), EngineError> {
        let group = self
            .group_for_booking(id)
            .ok_or(EngineError::NotFound(*id))?;
        let gs = self
            .get_group(&group)
            .ok_or_else(|| EngineError::GroupNotFound(group.clone()))?;
        let guard = gs.write_owned().await;
        Ok((group, guard))
    }
}

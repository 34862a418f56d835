mod availability;
mod conflict;
mod error;
mod housekeeping;
mod invoice;
mod lifecycle;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{
    alternative_for, blocked_nights, conflict_on, free_days, is_free, revalidation_windows, subtract_range,
};
pub use conflict::now_ms;
pub use error::EngineError;
pub use housekeeping::{NewTask, TaskBoard};
pub use invoice::InvoiceLedger;
pub use lifecycle::{BookingEdit, NewBooking, Transition};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::config::Settings;
use crate::model::*;
use crate::ports::GuestDirectory;
use crate::wal::Wal;

pub type SharedUnitState = Arc<RwLock<RoomUnitState>>;
pub type SharedBooking = Arc<Mutex<Booking>>;

pub(crate) type UnitGuards = HashMap<UnitId, OwnedRwLockWriteGuard<RoomUnitState>>;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is running are written
/// together and share one fsync; other commands run between batches.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<PendingAppend> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut deferred = None;
        match cmd {
            WalCommand::Append { event, response } => {
                batch.push((event, response));
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }
            }
            other => deferred = Some(other),
        }
        if !batch.is_empty() {
            commit_batch(&mut wal, &mut batch);
        }
        if let Some(cmd) = deferred {
            run_command(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes do not ride
    // along with the next batch.
    let flushed = wal.flush_sync();
    let outcome = appended.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let reply = match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn run_command(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {
            tracing::error!("append reached run_command; appends are batched by the writer loop");
        }
    }
}

/// Reservation & room-turnover engine for one property.
pub struct Engine {
    pub(super) units: DashMap<UnitId, SharedUnitState>,
    pub(super) room_types: DashMap<Ulid, RoomType>,
    pub(super) bookings: DashMap<Ulid, SharedBooking>,
    /// Booking reference → booking id.
    pub(super) references: DashMap<String, Ulid>,
    /// Invoice snapshots by booking id.
    pub(super) invoices: DashMap<Ulid, Invoice>,
    pub(super) tasks: Mutex<TaskBoard>,
    pub(super) ledger: Mutex<InvoiceLedger>,
    pub(super) settings: RwLock<Settings>,
    /// Serialises room type and room unit creation.
    pub(super) catalog: Mutex<()>,
    /// Mutations hold this shared; compaction takes it exclusively so the
    /// snapshot it writes cannot miss an in-flight change.
    pub(super) gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) guests: Arc<dyn GuestDirectory>,
}

/// Apply an occupancy event to a unit (no locking, caller holds the lock).
fn apply_to_unit(unit: &mut RoomUnitState, event: &Event) {
    match event {
        Event::OccupancyAdded { record, .. } => unit.insert_record(record.clone()),
        Event::OccupancyStatusSet { reference, status, .. } => {
            unit.update_record(reference, |r| {
                if let Claim::Stay { status: current, .. } = &mut r.claim {
                    *current = *status;
                }
            });
        }
        Event::OccupancyRangeSet { reference, range, guests, .. } => {
            unit.update_record(reference, |r| {
                if let Claim::Stay { range: current, .. } = &mut r.claim {
                    *current = *range;
                }
                r.guests = *guests;
            });
        }
        Event::OccupancyReleased { reference, .. } => {
            unit.pull_record(reference);
        }
        Event::TurnoverOpened { reference, since, .. } => {
            let converted = unit.update_record(reference, |r| {
                r.claim = Claim::OpenHold {
                    since: *since,
                    reason: HoldReason::Turnover,
                };
            });
            if !converted {
                unit.insert_record(OccupancyRecord::hold(reference.clone(), *since, HoldReason::Turnover));
            }
        }
        _ => {}
    }
}

/// Apply a booking-scoped event (caller holds the booking lock).
fn apply_to_booking(booking: &mut Booking, event: &Event) {
    match event {
        Event::BookingRevised { booking: revised } => *booking = revised.clone(),
        Event::BookingStatusChanged {
            status,
            at,
            invoice_number,
            ..
        } => {
            booking.status = *status;
            booking.status_timestamps.insert(*status, *at);
            if invoice_number.is_some() {
                booking.invoice_number = invoice_number.clone();
            }
        }
        Event::InvoiceNumberAssigned { number, .. } => booking.invoice_number = Some(number.clone()),
        _ => {}
    }
}

/// Unit an occupancy event targets.
fn event_unit(event: &Event) -> Option<&UnitId> {
    match event {
        Event::OccupancyAdded { unit, .. }
        | Event::OccupancyStatusSet { unit, .. }
        | Event::OccupancyRangeSet { unit, .. }
        | Event::OccupancyReleased { unit, .. }
        | Event::TurnoverOpened { unit, .. } => Some(unit),
        _ => None,
    }
}

/// Booking a booking-scoped event targets.
fn event_booking(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingRevised { booking } => Some(booking.id),
        Event::BookingStatusChanged { id, .. } => Some(*id),
        Event::InvoiceNumberAssigned { booking_id, .. } => Some(*booking_id),
        _ => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, settings: Settings, guests: Arc<dyn GuestDirectory>) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            units: DashMap::new(),
            room_types: DashMap::new(),
            bookings: DashMap::new(),
            references: DashMap::new(),
            invoices: DashMap::new(),
            tasks: Mutex::new(TaskBoard::default()),
            ledger: Mutex::new(InvoiceLedger::default()),
            settings: RwLock::new(settings),
            catalog: Mutex::new(()),
            gate: RwLock::new(()),
            wal_tx,
            guests,
        };

        let replayed = replay.events.len();
        for event in &replay.events {
            engine.replay_event(event);
        }
        if replayed > 0 {
            tracing::info!(
                "replayed {replayed} events: {} units, {} bookings",
                engine.units.len(),
                engine.bookings.len()
            );
        }
        Ok(engine)
    }

    /// Apply a logged event during startup. We are the sole owner of every
    /// lock here, so the `try_*` acquisitions cannot fail; never block, this
    /// may run inside an async context.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::SettingsUpdated { settings } => {
                if let Ok(mut current) = self.settings.try_write() {
                    *current = settings.clone();
                }
            }
            Event::RoomTypeCreated { room_type } => {
                self.room_types.insert(room_type.id, room_type.clone());
            }
            Event::RoomUnitCreated { id, room_type } => {
                self.units
                    .insert(id.clone(), Arc::new(RwLock::new(RoomUnitState::new(id.clone(), *room_type))));
            }
            Event::BookingCreated { booking } => self.insert_booking(booking.clone()),
            Event::InvoiceIssued { invoice } => {
                self.invoices.insert(invoice.booking_id, invoice.clone());
            }
            Event::FinancialYearOpened { .. } | Event::InvoiceSequenceAdvanced { .. } => {
                if let Ok(mut ledger) = self.ledger.try_lock() {
                    ledger.apply(event);
                }
            }
            Event::TaskCreated { .. }
            | Event::TaskStarted { .. }
            | Event::TaskCompleted { .. }
            | Event::TaskDeleted { .. } => {
                if let Ok(mut board) = self.tasks.try_lock() {
                    board.apply(event);
                }
            }
            other => {
                if let Some(unit_id) = event_unit(other) {
                    if let Some(shared) = self.get_unit(unit_id)
                        && let Ok(mut unit) = shared.try_write()
                    {
                        apply_to_unit(&mut unit, other);
                    }
                } else if let Some(id) = event_booking(other)
                    && let Some(shared) = self.get_booking(&id)
                    && let Ok(mut booking) = shared.try_lock()
                {
                    apply_to_booking(&mut booking, other);
                    if let Event::InvoiceNumberAssigned { number, .. } = other {
                        self.stamp_invoice(id, number);
                    }
                }
            }
        }
    }

    pub(super) fn insert_booking(&self, booking: Booking) {
        self.references.insert(booking.reference.clone(), booking.id);
        self.bookings.insert(booking.id, Arc::new(Mutex::new(booking)));
    }

    pub(super) fn stamp_invoice(&self, booking_id: Ulid, number: &str) {
        if let Some(mut invoice) = self.invoices.get_mut(&booking_id) {
            invoice.number = Some(number.to_string());
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    /// WAL-append then apply to a locked unit.
    pub(super) async fn persist_unit(&self, unit: &mut RoomUnitState, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        apply_to_unit(unit, &event);
        Ok(())
    }

    /// WAL-append then apply to a locked booking.
    pub(super) async fn persist_booking(&self, booking: &mut Booking, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        apply_to_booking(booking, &event);
        if let Event::InvoiceNumberAssigned { booking_id, number } = &event {
            self.stamp_invoice(*booking_id, number);
        }
        Ok(())
    }

    pub(super) fn get_unit(&self, id: &str) -> Option<SharedUnitState> {
        self.units.get(id).map(|e| e.value().clone())
    }

    pub(super) fn unit_or_not_found(&self, id: &str) -> Result<SharedUnitState, EngineError> {
        self.get_unit(id).ok_or_else(|| EngineError::not_found("room unit", id))
    }

    pub(super) fn get_booking(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub(super) fn booking_or_not_found(&self, id: &Ulid) -> Result<SharedBooking, EngineError> {
        self.get_booking(id).ok_or_else(|| EngineError::not_found("booking", id))
    }

    /// Current live settings.
    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Write-lock several units in sorted order so concurrent multi-room
    /// operations cannot deadlock.
    pub(super) async fn lock_units<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a UnitId>,
    ) -> Result<UnitGuards, EngineError> {
        let mut sorted: Vec<&UnitId> = ids.into_iter().collect();
        sorted.sort();
        sorted.dedup();
        let shared: Vec<SharedUnitState> = sorted
            .iter()
            .map(|id| self.unit_or_not_found(id))
            .collect::<Result<_, _>>()?;
        let mut guards = HashMap::with_capacity(sorted.len());
        for (id, unit) in sorted.into_iter().zip(shared) {
            guards.insert(id.clone(), unit.write_owned().await);
        }
        Ok(guards)
    }
}

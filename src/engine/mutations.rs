use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::config::Settings;
use crate::limits::*;
use crate::model::*;
use crate::validation::validate_stay;

use super::conflict::{check_record_room, ensure_free, UnitCheck};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Replace the live settings. Every later operation reads the new values.
    pub async fn update_settings(&self, settings: Settings) -> Result<(), EngineError> {
        if settings.invoice_format.sequence_width > 12 {
            return Err(EngineError::Validation("invoice sequence width above 12".into()));
        }
        if settings.weekend_hike_percent > MAX_WEEKEND_HIKE_PERCENT {
            return Err(EngineError::LimitExceeded("weekend hike too large"));
        }
        let _gate = self.gate.read().await;
        let mut current = self.settings.write().await;
        let event = Event::SettingsUpdated { settings: settings.clone() };
        self.wal_append(&event).await?;
        *current = settings;
        tracing::info!("settings updated");
        Ok(())
    }

    pub async fn create_room_type(&self, room_type: RoomType) -> Result<(), EngineError> {
        if self.room_types.len() >= MAX_ROOM_TYPES {
            return Err(EngineError::LimitExceeded("too many room types"));
        }
        if room_type.category.trim().is_empty() {
            return Err(EngineError::Validation("room type category is required".into()));
        }
        if room_type.category.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room type category too long"));
        }
        if room_type.nightly_rate < 0 || room_type.extra_guest_charge < 0 {
            return Err(EngineError::Validation("room type charges cannot be negative".into()));
        }
        if room_type.nightly_rate > MAX_NIGHTLY_RATE || room_type.extra_guest_charge > MAX_EXTRA_GUEST_CHARGE {
            return Err(EngineError::LimitExceeded("room type charge too large"));
        }
        if room_type.tax_rate_bp > MAX_TAX_RATE_BP {
            return Err(EngineError::LimitExceeded("tax rate above 100%"));
        }
        if room_type.capacity == 0 {
            return Err(EngineError::Validation("room type capacity must be at least one".into()));
        }

        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        if self.room_types.contains_key(&room_type.id) {
            return Err(EngineError::AlreadyExists(format!("room type {}", room_type.id)));
        }
        let event = Event::RoomTypeCreated { room_type: room_type.clone() };
        self.wal_append(&event).await?;
        self.room_types.insert(room_type.id, room_type);
        Ok(())
    }

    pub async fn create_room_unit(&self, id: &str, room_type: Ulid) -> Result<(), EngineError> {
        if self.units.len() >= MAX_UNITS {
            return Err(EngineError::LimitExceeded("too many room units"));
        }
        if id.trim().is_empty() {
            return Err(EngineError::Validation("room number is required".into()));
        }
        if id.len() > MAX_UNIT_ID_LEN {
            return Err(EngineError::LimitExceeded("room number too long"));
        }

        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        if !self.room_types.contains_key(&room_type) {
            return Err(EngineError::not_found("room type", room_type));
        }
        if self.units.contains_key(id) {
            return Err(EngineError::AlreadyExists(format!("room {id}")));
        }
        let event = Event::RoomUnitCreated {
            id: id.to_string(),
            room_type,
        };
        self.wal_append(&event).await?;
        self.units.insert(
            id.to_string(),
            Arc::new(RwLock::new(RoomUnitState::new(id.to_string(), room_type))),
        );
        Ok(())
    }

    /// Claim `range` on `unit` under `reference`.
    ///
    /// The check and the write happen under one write lock, so of two
    /// concurrent overlapping allocations exactly one succeeds.
    pub async fn allocate(
        &self,
        unit_id: &str,
        reference: &str,
        range: StayRange,
        guests: GuestCount,
    ) -> Result<(), EngineError> {
        validate_stay(&range)?;
        if reference.trim().is_empty() {
            return Err(EngineError::Validation("reference is required".into()));
        }
        let _gate = self.gate.read().await;
        let shared = self.unit_or_not_found(unit_id)?;
        let mut unit = shared.write().await;
        check_record_room(&unit)?;
        if unit.record(reference).is_some() {
            return Err(EngineError::AlreadyExists(format!("{reference} on room {unit_id}")));
        }
        ensure_free(
            &[UnitCheck {
                unit: &unit,
                windows: vec![range],
            }],
            None,
            range.check_in,
        )?;

        let event = Event::OccupancyAdded {
            unit: unit_id.to_string(),
            record: OccupancyRecord::stay(reference, range, guests),
        };
        self.persist_unit(&mut unit, event).await?;
        tracing::debug!("allocated room {unit_id} {range} to {reference}");
        Ok(())
    }

    /// Pull the record `reference` holds on `unit`. Releasing an absent
    /// record is not an error; the caller learns whether anything was held.
    /// This is also how an operator clears a hold left behind by a deleted task.
    pub async fn release(&self, unit_id: &str, reference: &str) -> Result<Option<OccupancyRecord>, EngineError> {
        let _gate = self.gate.read().await;
        let shared = self.unit_or_not_found(unit_id)?;
        let mut unit = shared.write().await;
        let Some(record) = unit.record(reference).cloned() else {
            return Ok(None);
        };
        let event = Event::OccupancyReleased {
            unit: unit_id.to_string(),
            reference: reference.to_string(),
        };
        self.persist_unit(&mut unit, event).await?;
        tracing::debug!("released {reference} from room {unit_id}");
        Ok(Some(record))
    }

    /// Rewrite the WAL with only the events needed to rebuild current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // No mutation runs while we snapshot and swap.
        let _gate = self.gate.write().await;
        let mut events = vec![Event::SettingsUpdated {
            settings: self.settings.read().await.clone(),
        }];

        events.extend(self.room_types.iter().map(|e| Event::RoomTypeCreated {
            room_type: e.value().clone(),
        }));

        let units: Vec<_> = self.units.iter().map(|e| e.value().clone()).collect();
        for shared in units {
            let unit = shared.read().await;
            events.push(Event::RoomUnitCreated {
                id: unit.id.clone(),
                room_type: unit.room_type,
            });
            events.extend(unit.records.iter().map(|r| Event::OccupancyAdded {
                unit: unit.id.clone(),
                record: r.clone(),
            }));
        }

        events.extend(self.ledger.lock().await.snapshot_events());

        let bookings: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        for shared in bookings {
            events.push(Event::BookingCreated {
                booking: shared.lock().await.clone(),
            });
        }
        events.extend(self.invoices.iter().map(|e| Event::InvoiceIssued {
            invoice: e.value().clone(),
        }));
        events.extend(self.tasks.lock().await.snapshot_events());

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("WAL compacted to {count} events");
        Ok(())
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

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::validation::validate_stay;

use super::availability::{free_days, is_free};
use super::{Engine, EngineError};

impl Engine {
    /// Whether every night of `range` on `unit` is unclaimed.
    pub async fn is_available(&self, unit_id: &str, range: &StayRange) -> Result<bool, EngineError> {
        validate_stay(range)?;
        let shared = self.unit_or_not_found(unit_id)?;
        let unit = shared.read().await;
        Ok(is_free(&unit, range, None))
    }

    /// Units of `room_type` free for the whole of `range`, sorted by room number.
    pub async fn find_available_units(&self, room_type: Ulid, range: &StayRange) -> Result<Vec<UnitId>, EngineError> {
        validate_stay(range)?;
        if !self.room_types.contains_key(&room_type) {
            return Err(EngineError::not_found("room type", room_type));
        }
        let candidates: Vec<_> = self.units.iter().map(|e| e.value().clone()).collect();
        let mut free = Vec::new();
        for shared in candidates {
            let unit = shared.read().await;
            if unit.room_type == room_type && is_free(&unit, range, None) {
                free.push(unit.id.clone());
            }
        }
        free.sort();
        Ok(free)
    }

    pub async fn free_days(&self, unit_id: &str, from: NaiveDate, horizon_days: u32) -> Result<Vec<NaiveDate>, EngineError> {
        let shared = self.unit_or_not_found(unit_id)?;
        let unit = shared.read().await;
        Ok(free_days(&unit, from, horizon_days, None))
    }

    /// Every record on the unit, ordered by first night.
    pub async fn occupancy(&self, unit_id: &str) -> Result<Vec<OccupancyRecord>, EngineError> {
        let shared = self.unit_or_not_found(unit_id)?;
        let unit = shared.read().await;
        Ok(unit.records.clone())
    }

    pub fn room_type(&self, id: Ulid) -> Option<RoomType> {
        self.room_types.get(&id).map(|e| e.value().clone())
    }

    pub fn room_types(&self) -> Vec<RoomType> {
        let mut types: Vec<RoomType> = self.room_types.iter().map(|e| e.value().clone()).collect();
        types.sort_by(|a, b| a.category.cmp(&b.category));
        types
    }

    pub async fn room_units(&self) -> Vec<RoomUnitInfo> {
        let shared: Vec<_> = self.units.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for unit in shared {
            let unit = unit.read().await;
            out.push(RoomUnitInfo {
                id: unit.id.clone(),
                room_type: unit.room_type,
                records: unit.records.len(),
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let shared = self.booking_or_not_found(&id)?;
        let booking = shared.lock().await;
        Ok(booking.clone())
    }

    pub async fn booking_by_reference(&self, reference: &str) -> Result<Booking, EngineError> {
        let id = self
            .references
            .get(reference)
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::not_found("booking", reference))?;
        self.booking(id).await
    }

    /// Bookings, optionally filtered by status, oldest first.
    pub async fn bookings(&self, status: Option<BookingStatus>) -> Vec<Booking> {
        let shared: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for booking in shared {
            let booking = booking.lock().await;
            if status.is_none_or(|s| booking.status == s) {
                out.push(booking.clone());
            }
        }
        out.sort_by_key(|b| b.id);
        out
    }

    pub fn invoice(&self, booking_id: Ulid) -> Option<Invoice> {
        self.invoices.get(&booking_id).map(|e| e.value().clone())
    }

    /// Bookings still holding rooms whose scheduled departure is at or before `now`.
    pub async fn collect_overdue(&self, now: Ms) -> Vec<Ulid> {
        let settings = self.settings().await;
        let shared: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut overdue = Vec::new();
        for booking in shared {
            let booking = booking.lock().await;
            if booking.status.holds_rooms() && booking.departs_at(&settings) <= now {
                overdue.push(booking.id);
            }
        }
        overdue.sort();
        overdue
    }

    /// Checked-out bookings that never received an invoice number.
    pub async fn collect_missing_invoices(&self) -> Vec<Ulid> {
        let shared: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut missing = Vec::new();
        for booking in shared {
            let booking = booking.lock().await;
            if booking.status == BookingStatus::CheckedOut && booking.invoice_number.is_none() {
                missing.push(booking.id);
            }
        }
        missing.sort();
        missing
    }
}

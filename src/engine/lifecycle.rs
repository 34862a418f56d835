use std::collections::{BTreeMap, HashSet};

use ulid::Ulid;

use crate::effects::Effect;
use crate::model::*;
use crate::phase::{self, Mirror, Step};
use crate::pricing::quote;
use crate::validation::*;

use super::availability::revalidation_windows;
use super::conflict::{check_record_room, ensure_free, UnitCheck};
use super::{Engine, EngineError, UnitGuards};

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub guest: GuestDetails,
    pub stay: StayRange,
    pub rooms: Vec<RoomRequest>,
    pub settlement: Settlement,
    pub documents: Vec<DocumentRef>,
    pub notes: Option<String>,
}

/// Changes to an open booking. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct BookingEdit {
    pub guest: Option<GuestDetails>,
    pub stay: Option<StayRange>,
    pub rooms: Option<Vec<RoomRequest>>,
    pub settlement: Option<Settlement>,
    pub documents: Option<Vec<DocumentRef>>,
    pub notes: Option<String>,
}

/// Result of a lifecycle operation: the booking as it now stands plus the
/// side effects the caller should hand to an `EffectDispatcher`.
#[derive(Debug, Clone)]
pub struct Transition {
    pub booking: Booking,
    /// False when the request was a no-op.
    pub changed: bool,
    pub effects: Vec<Effect>,
    /// Invoice issued by a checkout.
    pub invoice: Option<Invoice>,
    /// Parts of the operation that were skipped but did not fail it.
    pub warnings: Vec<String>,
}

impl Transition {
    fn unchanged(booking: Booking) -> Self {
        Self {
            booking,
            changed: false,
            effects: Vec::new(),
            invoice: None,
            warnings: Vec::new(),
        }
    }

    fn changed(booking: Booking, effects: Vec<Effect>) -> Self {
        Self {
            booking,
            changed: true,
            effects,
            invoice: None,
            warnings: Vec::new(),
        }
    }
}

fn request_of(room: &RoomAssignment) -> RoomRequest {
    RoomRequest {
        room_type: room.room_type,
        unit: room.unit.clone(),
        guests: room.guests,
    }
}

impl Engine {
    /// Price, resolve the guest and claim every requested room atomically.
    pub async fn create_booking(&self, req: NewBooking, now: Ms) -> Result<Transition, EngineError> {
        validate_guest(&req.guest)?;
        validate_stay(&req.stay)?;
        validate_rooms(&req.rooms)?;
        validate_extras(req.notes.as_deref(), &req.documents)?;

        let room_types = req
            .rooms
            .iter()
            .map(|r| self.room_type(r.room_type).ok_or_else(|| EngineError::not_found("room type", r.room_type)))
            .collect::<Result<Vec<_>, _>>()?;
        let guest_id = self
            .guests
            .get_or_create_guest_id(&req.guest.email, &req.guest.phone)
            .await
            .map_err(EngineError::Collaborator)?;

        let _gate = self.gate.read().await;
        let settings = self.settings().await;
        let mut guards = self.lock_units(req.rooms.iter().map(|r| &r.unit)).await?;
        for (room, room_type) in req.rooms.iter().zip(&room_types) {
            check_unit_type(&guards, room, room_type)?;
            if let Some(unit) = guards.get(&room.unit) {
                check_record_room(unit)?;
            }
        }
        {
            let checks: Vec<UnitCheck<'_>> = req
                .rooms
                .iter()
                .filter_map(|r| guards.get(&r.unit))
                .map(|unit| UnitCheck {
                    unit,
                    windows: vec![req.stay],
                })
                .collect();
            ensure_free(&checks, None, req.stay.check_in)?;
        }
        let prices = req
            .rooms
            .iter()
            .zip(&room_types)
            .map(|(r, t)| quote(t, &req.stay, r.guests, &settings))
            .collect::<Result<Vec<_>, _>>()?;

        let id = Ulid::new();
        let booking = Booking {
            id,
            reference: Booking::reference_for(id),
            guest_id,
            guest: req.guest,
            stay: req.stay,
            rooms: req
                .rooms
                .iter()
                .zip(prices)
                .map(|(r, price)| RoomAssignment {
                    room_type: r.room_type,
                    unit: r.unit.clone(),
                    guests: r.guests,
                    price,
                })
                .collect(),
            status: BookingStatus::Booked,
            status_timestamps: BTreeMap::from([(BookingStatus::Booked, now)]),
            invoice_number: None,
            settlement: req.settlement,
            documents: req.documents,
            notes: req.notes,
            created_at: now,
        };

        for room in &booking.rooms {
            let Some(unit) = guards.get_mut(&room.unit) else {
                continue;
            };
            let event = Event::OccupancyAdded {
                unit: room.unit.clone(),
                record: OccupancyRecord::stay(booking.reference.clone(), booking.stay, room.guests),
            };
            self.persist_unit(unit, event).await?;
        }
        self.wal_append(&Event::BookingCreated {
            booking: booking.clone(),
        })
        .await?;
        self.insert_booking(booking.clone());
        drop(guards);

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::info!(
            "booking {} created: {} room(s) {}",
            booking.reference,
            booking.rooms.len(),
            booking.stay
        );
        let effects = vec![Effect::SendConfirmation {
            booking: Box::new(booking.clone()),
        }];
        Ok(Transition::changed(booking, effects))
    }

    pub async fn check_in(&self, id: Ulid, now: Ms) -> Result<Transition, EngineError> {
        self.transition(id, BookingStatus::CheckedIn, now).await
    }

    pub async fn cancel(&self, id: Ulid, now: Ms) -> Result<Transition, EngineError> {
        self.transition(id, BookingStatus::Cancelled, now).await
    }

    /// Close the stay: mint an invoice number, issue the invoice and hand
    /// every room to housekeeping. A failed mint or turnover is reported in
    /// `warnings` and does not undo the checkout.
    pub async fn check_out(&self, id: Ulid, now: Ms) -> Result<Transition, EngineError> {
        self.transition(id, BookingStatus::CheckedOut, now).await
    }

    async fn transition(&self, id: Ulid, to: BookingStatus, now: Ms) -> Result<Transition, EngineError> {
        let _gate = self.gate.read().await;
        let shared = self.booking_or_not_found(&id)?;
        let mut booking = shared.lock().await;
        match phase::step(booking.status, to) {
            Step::NoOp => return Ok(Transition::unchanged(booking.clone())),
            Step::Reject => {
                return Err(EngineError::InvalidTransition {
                    from: booking.status,
                    to,
                });
            }
            Step::Apply => {}
        }

        let from = booking.status;
        let result = match phase::mirror(to) {
            Mirror::Turnover => self.depart(&mut booking, now).await?,
            mirror => self.mirror_status(&mut booking, to, mirror, now).await?,
        };
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        tracing::info!("booking {} {from} -> {to}", booking.reference);
        Ok(result)
    }

    /// Check-in and cancel: mirror the new status onto every occupancy record.
    async fn mirror_status(
        &self,
        booking: &mut Booking,
        to: BookingStatus,
        mirror: Mirror,
        now: Ms,
    ) -> Result<Transition, EngineError> {
        let units: Vec<UnitId> = booking.units().cloned().collect();
        let mut guards = self.lock_units(&units).await?;
        for unit_id in &units {
            let Some(unit) = guards.get_mut(unit_id) else {
                continue;
            };
            if unit.record(&booking.reference).is_none() {
                tracing::warn!("booking {} has no record on room {unit_id}", booking.reference);
                continue;
            }
            let event = match mirror {
                Mirror::Set(status) => Event::OccupancyStatusSet {
                    unit: unit_id.clone(),
                    reference: booking.reference.clone(),
                    status,
                },
                _ => Event::OccupancyReleased {
                    unit: unit_id.clone(),
                    reference: booking.reference.clone(),
                },
            };
            self.persist_unit(unit, event).await?;
        }
        drop(guards);

        let event = Event::BookingStatusChanged {
            id: booking.id,
            status: to,
            at: now,
            invoice_number: None,
        };
        self.persist_booking(booking, event).await?;

        let effects = match to {
            BookingStatus::CheckedIn => vec![Effect::ConsumeAmenities {
                reference: booking.reference.clone(),
                units,
            }],
            BookingStatus::Cancelled => vec![Effect::SendCancellation {
                booking: Box::new(booking.clone()),
            }],
            _ => Vec::new(),
        };
        Ok(Transition::changed(booking.clone(), effects))
    }

    async fn depart(&self, booking: &mut Booking, now: Ms) -> Result<Transition, EngineError> {
        let mut warnings = Vec::new();
        let number = match self.mint_invoice_number().await {
            Ok(number) => Some(number),
            Err(EngineError::SequenceAllocation(reason)) => {
                metrics::counter!(crate::observability::INVOICE_MINT_FAILURES_TOTAL).increment(1);
                tracing::warn!("checkout of {} continues without invoice number: {reason}", booking.reference);
                warnings.push(format!("invoice number not assigned: {reason}"));
                None
            }
            Err(e) => return Err(e),
        };

        let event = Event::BookingStatusChanged {
            id: booking.id,
            status: BookingStatus::CheckedOut,
            at: now,
            invoice_number: number.clone(),
        };
        self.persist_booking(booking, event).await?;

        let invoice = Invoice::snapshot(booking, number, now);
        self.wal_append(&Event::InvoiceIssued {
            invoice: invoice.clone(),
        })
        .await?;
        self.invoices.insert(booking.id, invoice.clone());

        for unit in booking.units() {
            if let Err(e) = self.open_turnover(unit, &booking.reference, now).await {
                tracing::warn!("turnover for room {unit} after {} not opened: {e}", booking.reference);
                warnings.push(format!("turnover for room {unit} not opened: {e}"));
            }
        }

        Ok(Transition {
            booking: booking.clone(),
            changed: true,
            effects: Vec::new(),
            invoice: Some(invoice),
            warnings,
        })
    }

    /// Move an overdue booking to checked-out without minting or turnover.
    /// Used when a regular checkout cannot complete.
    pub async fn force_check_out(&self, id: Ulid, now: Ms) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let shared = self.booking_or_not_found(&id)?;
        let mut booking = shared.lock().await;
        if !booking.status.holds_rooms() {
            return Ok(booking.clone());
        }
        let event = Event::BookingStatusChanged {
            id,
            status: BookingStatus::CheckedOut,
            at: now,
            invoice_number: None,
        };
        self.persist_booking(&mut booking, event).await?;
        tracing::warn!("booking {} force-checked-out", booking.reference);
        Ok(booking.clone())
    }

    /// Give a checked-out booking the invoice number its checkout could not
    /// mint. Returns `None` when there is nothing to backfill.
    pub async fn backfill_invoice(&self, id: Ulid, now: Ms) -> Result<Option<String>, EngineError> {
        let _gate = self.gate.read().await;
        let shared = self.booking_or_not_found(&id)?;
        let mut booking = shared.lock().await;
        if booking.status != BookingStatus::CheckedOut || booking.invoice_number.is_some() {
            return Ok(None);
        }
        let number = self.mint_invoice_number().await?;
        let event = Event::InvoiceNumberAssigned {
            booking_id: id,
            number: number.clone(),
        };
        self.persist_booking(&mut booking, event).await?;
        if !self.invoices.contains_key(&id) {
            let invoice = Invoice::snapshot(&booking, Some(number.clone()), now);
            self.wal_append(&Event::InvoiceIssued {
                invoice: invoice.clone(),
            })
            .await?;
            self.invoices.insert(id, invoice);
        }
        tracing::info!("invoice {number} backfilled for {}", booking.reference);
        Ok(Some(number))
    }

    /// Edit an open booking. Date or room changes are re-validated against
    /// every other claim; nights the booking already holds on a kept room are
    /// not re-checked.
    pub async fn edit_booking(&self, id: Ulid, edit: BookingEdit, now: Ms) -> Result<Transition, EngineError> {
        if let Some(guest) = &edit.guest {
            validate_guest(guest)?;
        }
        if let Some(stay) = &edit.stay {
            validate_stay(stay)?;
        }
        if let Some(rooms) = &edit.rooms {
            validate_rooms(rooms)?;
        }
        if let Some(documents) = &edit.documents {
            validate_extras(edit.notes.as_deref(), documents)?;
        } else {
            validate_extras(edit.notes.as_deref(), &[])?;
        }

        let _gate = self.gate.read().await;
        let shared = self.booking_or_not_found(&id)?;
        let mut booking = shared.lock().await;
        if !booking.status.holds_rooms() {
            return Err(EngineError::Validation(format!(
                "booking {} is {} and can no longer be edited",
                booking.reference, booking.status
            )));
        }

        let mut revised = booking.clone();
        if let Some(guest) = edit.guest {
            revised.guest = guest;
        }
        if let Some(settlement) = edit.settlement {
            revised.settlement = settlement;
        }
        if let Some(documents) = edit.documents {
            revised.documents = documents;
        }
        if let Some(notes) = edit.notes {
            revised.notes = Some(notes);
        }

        // Same dates on the same rooms keep their claims and price snapshots.
        let current: Vec<RoomRequest> = booking.rooms.iter().map(request_of).collect();
        let stay = edit.stay.unwrap_or(booking.stay);
        let rooms = edit.rooms.unwrap_or_else(|| current.clone());
        if stay != booking.stay || rooms != current {
            revised.stay = stay;
            revised.rooms = self.reassign(&booking, stay, &rooms).await?;
        }

        let event = Event::BookingRevised {
            booking: revised.clone(),
        };
        self.persist_booking(&mut booking, event).await?;
        tracing::info!("booking {} revised at {now}", booking.reference);
        Ok(Transition::changed(booking.clone(), Vec::new()))
    }

    /// Move a booking's claims to `stay` on `rooms`, re-pricing every room.
    async fn reassign(
        &self,
        booking: &Booking,
        stay: StayRange,
        rooms: &[RoomRequest],
    ) -> Result<Vec<RoomAssignment>, EngineError> {
        let room_types = rooms
            .iter()
            .map(|r| self.room_type(r.room_type).ok_or_else(|| EngineError::not_found("room type", r.room_type)))
            .collect::<Result<Vec<_>, _>>()?;
        let settings = self.settings().await;

        let old: HashSet<&UnitId> = booking.units().collect();
        let new: HashSet<&UnitId> = rooms.iter().map(|r| &r.unit).collect();
        let mut guards = self.lock_units(old.union(&new).copied()).await?;
        let prices = rooms
            .iter()
            .zip(&room_types)
            .map(|(r, t)| quote(t, &stay, r.guests, &settings))
            .collect::<Result<Vec<_>, _>>()?;

        for (room, room_type) in rooms.iter().zip(&room_types) {
            check_unit_type(&guards, room, room_type)?;
            if !old.contains(&room.unit)
                && let Some(unit) = guards.get(&room.unit)
            {
                check_record_room(unit)?;
            }
        }
        {
            let checks: Vec<UnitCheck<'_>> = rooms
                .iter()
                .filter_map(|room| {
                    let unit = guards.get(&room.unit)?;
                    // Only nights the booking still holds on this unit are exempt.
                    let held = match unit.record(&booking.reference).map(|r| &r.claim) {
                        Some(Claim::Stay { range, .. }) => Some(range),
                        _ => None,
                    };
                    Some(UnitCheck {
                        unit,
                        windows: revalidation_windows(held, &stay),
                    })
                })
                .collect();
            ensure_free(&checks, Some(&booking.reference), stay.check_in)?;
        }

        for unit_id in old.difference(&new) {
            if let Some(unit) = guards.get_mut(*unit_id)
                && unit.record(&booking.reference).is_some()
            {
                let event = Event::OccupancyReleased {
                    unit: (*unit_id).clone(),
                    reference: booking.reference.clone(),
                };
                self.persist_unit(unit, event).await?;
            }
        }
        let status = StayStatus::for_booking(booking.status).unwrap_or(StayStatus::Booked);
        for room in rooms {
            let Some(unit) = guards.get_mut(&room.unit) else {
                continue;
            };
            let event = if unit.record(&booking.reference).is_some() {
                Event::OccupancyRangeSet {
                    unit: room.unit.clone(),
                    reference: booking.reference.clone(),
                    range: stay,
                    guests: room.guests,
                }
            } else {
                let mut record = OccupancyRecord::stay(booking.reference.clone(), stay, room.guests);
                record.claim = Claim::Stay { range: stay, status };
                Event::OccupancyAdded {
                    unit: room.unit.clone(),
                    record,
                }
            };
            self.persist_unit(unit, event).await?;
        }

        Ok(rooms
            .iter()
            .zip(prices)
            .map(|(r, price)| RoomAssignment {
                room_type: r.room_type,
                unit: r.unit.clone(),
                guests: r.guests,
                price,
            })
            .collect())
    }
}

fn check_unit_type(guards: &UnitGuards, room: &RoomRequest, room_type: &RoomType) -> Result<(), EngineError> {
    match guards.get(&room.unit) {
        Some(unit) if unit.room_type == room_type.id => Ok(()),
        Some(_) => Err(EngineError::Validation(format!(
            "room {} is not a {} room",
            room.unit, room_type.category
        ))),
        None => Err(EngineError::not_found("room unit", &room.unit)),
    }
}

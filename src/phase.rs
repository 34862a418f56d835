//! One vocabulary for where a room-night is in its life.
//!
//! Bookings, occupancy records and housekeeping tasks each carry their own
//! status label. Every label maps onto a [`Phase`], and the booking state
//! machine lives here so no caller compares status labels directly.

use crate::model::{BookingStatus, OccupancyStatus, ReservationStatus, StayStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Confirmed, guest not yet arrived.
    Reserved,
    /// Guest in the room.
    InHouse,
    /// Guest gone, booking closed.
    Departed,
    Cancelled,
    /// Room being cleaned after a departure.
    Turnover,
    Maintenance,
    /// Nothing claims the room.
    Vacant,
}

impl BookingStatus {
    pub fn phase(self) -> Phase {
        match self {
            BookingStatus::Booked => Phase::Reserved,
            BookingStatus::CheckedIn => Phase::InHouse,
            BookingStatus::CheckedOut => Phase::Departed,
            BookingStatus::Cancelled => Phase::Cancelled,
        }
    }

    /// Whether a booking in this status still owns its room-nights.
    pub fn holds_rooms(self) -> bool {
        matches!(self.phase(), Phase::Reserved | Phase::InHouse)
    }
}

impl OccupancyStatus {
    pub fn phase(self) -> Phase {
        match self {
            OccupancyStatus::Booked => Phase::Reserved,
            OccupancyStatus::CheckIn => Phase::InHouse,
            OccupancyStatus::Pending => Phase::Turnover,
            OccupancyStatus::Maintenance => Phase::Maintenance,
        }
    }
}

impl StayStatus {
    /// Stay status mirroring a booking status, if the booking still holds rooms.
    pub fn for_booking(status: BookingStatus) -> Option<StayStatus> {
        match status.phase() {
            Phase::Reserved => Some(StayStatus::Booked),
            Phase::InHouse => Some(StayStatus::CheckedIn),
            _ => None,
        }
    }
}

impl ReservationStatus {
    pub fn phase(self) -> Phase {
        match self {
            ReservationStatus::Booked => Phase::Reserved,
            ReservationStatus::CheckIn => Phase::InHouse,
            ReservationStatus::CheckOut => Phase::Turnover,
            ReservationStatus::Maintenance => Phase::Maintenance,
            ReservationStatus::Available => Phase::Vacant,
        }
    }
}

/// Outcome of asking the state machine for `from → to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Apply,
    /// Already there, or closed in a way the request cannot change.
    NoOp,
    Reject,
}

pub fn step(from: BookingStatus, to: BookingStatus) -> Step {
    use BookingStatus::*;
    match (from, to) {
        (Booked, CheckedIn) => Step::Apply,
        (Booked | CheckedIn, CheckedOut) => Step::Apply,
        (Booked | CheckedIn, Cancelled) => Step::Apply,
        (a, b) if a == b => Step::NoOp,
        (CheckedOut, Cancelled) => Step::NoOp,
        _ => Step::Reject,
    }
}

/// What a booking's occupancy records become on entering a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    Set(StayStatus),
    Release,
    Turnover,
}

pub fn mirror(to: BookingStatus) -> Mirror {
    match to.phase() {
        Phase::Reserved => Mirror::Set(StayStatus::Booked),
        Phase::InHouse => Mirror::Set(StayStatus::CheckedIn),
        Phase::Departed => Mirror::Turnover,
        _ => Mirror::Release,
    }
}

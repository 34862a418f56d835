use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern"));
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{6,18}[0-9]$").expect("phone pattern"));
static PASSPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][0-9]{7,8}$").expect("passport pattern"));
static NATIONAL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{12}$").expect("national id pattern"));
static DRIVING_LICENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}[0-9]{2}[ -]?[0-9]{11}$").expect("licence pattern"));

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::Validation(msg.into())
}

pub fn validate_guest(guest: &GuestDetails) -> Result<(), EngineError> {
    let name = guest.name.trim();
    if name.is_empty() {
        return Err(invalid("guest name is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    if !EMAIL.is_match(guest.email.trim()) {
        return Err(invalid(format!("malformed email: {:?}", guest.email)));
    }
    if !PHONE.is_match(guest.phone.trim()) {
        return Err(invalid(format!("malformed phone number: {:?}", guest.phone)));
    }
    if let Some(doc) = &guest.id_document {
        validate_id_document(doc)?;
    }
    Ok(())
}

pub fn validate_id_document(doc: &IdDocument) -> Result<(), EngineError> {
    let number = doc.number.trim().to_ascii_uppercase();
    let pattern = match doc.kind {
        IdKind::Passport => &*PASSPORT,
        IdKind::NationalId => &*NATIONAL_ID,
        IdKind::DrivingLicence => &*DRIVING_LICENCE,
    };
    if !pattern.is_match(&number) {
        return Err(invalid(format!("{:?} number {:?} has the wrong format", doc.kind, doc.number)));
    }
    Ok(())
}

pub fn validate_stay(stay: &StayRange) -> Result<(), EngineError> {
    if stay.check_in >= stay.check_out {
        return Err(invalid("check-out must be after check-in"));
    }
    if stay.check_in.year() < MIN_STAY_YEAR || stay.check_out.year() > MAX_STAY_YEAR {
        return Err(EngineError::LimitExceeded("stay dates out of range"));
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// A requested room: which unit, of which type, for how many guests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRequest {
    pub room_type: ulid::Ulid,
    pub unit: UnitId,
    pub guests: GuestCount,
}

pub fn validate_rooms(rooms: &[RoomRequest]) -> Result<(), EngineError> {
    if rooms.is_empty() {
        return Err(invalid("at least one room is required"));
    }
    if rooms.len() > MAX_ROOMS_PER_BOOKING {
        return Err(EngineError::LimitExceeded("too many rooms in one booking"));
    }
    let mut seen = HashSet::new();
    for room in rooms {
        if !seen.insert(room.unit.as_str()) {
            return Err(invalid(format!("room {} requested twice", room.unit)));
        }
        if room.guests.adults == 0 {
            return Err(invalid(format!("room {} needs at least one adult", room.unit)));
        }
    }
    Ok(())
}

pub fn validate_extras(notes: Option<&str>, documents: &[DocumentRef]) -> Result<(), EngineError> {
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    if documents.len() > MAX_DOCUMENTS {
        return Err(EngineError::LimitExceeded("too many documents"));
    }
    if let Some(doc) = documents.iter().find(|d| d.file_name.trim().is_empty() || d.file_path.trim().is_empty()) {
        return Err(invalid(format!("document reference incomplete: {:?}", doc.file_name)));
    }
    Ok(())
}

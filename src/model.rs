use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::Settings;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

/// Money in minor currency units.
pub type Money = i64;

/// Room number as printed on the door, e.g. `"101"`.
pub type UnitId = String;

pub const HOUR_MS: Ms = 3_600_000;

/// Calendar day (UTC) containing the instant.
pub fn day_of(at: Ms) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(at)
        .map(|dt| dt.date_naive())
        .unwrap_or(NaiveDate::MIN)
}

/// Instant for a wall-clock time on a given day, wall clock read as UTC.
pub fn instant_at(day: NaiveDate, time: NaiveTime) -> Ms {
    day.and_time(time).and_utc().timestamp_millis()
}

/// Half-open night range `[check_in, check_out)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "StayRange check_in must be before check_out");
        Self { check_in, check_out }
    }

    pub fn try_new(check_in: NaiveDate, check_out: NaiveDate) -> Option<Self> {
        (check_in < check_out).then_some(Self { check_in, check_out })
    }

    /// The single night starting on `day`.
    pub fn night_of(day: NaiveDate) -> Option<Self> {
        day.succ_opt().map(|next| Self::new(day, next))
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.check_in <= day && day < self.check_out
    }

    /// Every night in the range, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.check_out;
        self.check_in.iter_days().take_while(move |d| *d < end)
    }
}

impl fmt::Display for StayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCount {
    pub adults: u32,
    pub children: u32,
}

impl GuestCount {
    pub fn new(adults: u32, children: u32) -> Self {
        Self { adults, children }
    }

    pub fn total(&self) -> u32 {
        self.adults + self.children
    }
}

// ── Occupancy ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StayStatus {
    Booked,
    CheckedIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldReason {
    Maintenance,
    Turnover,
}

/// What a record claims on its unit: a bounded stay or an open-ended hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Claim {
    Stay { range: StayRange, status: StayStatus },
    /// Blocks the unit from `since` until the record is pulled.
    OpenHold { since: NaiveDate, reason: HoldReason },
}

/// Flat status label of an occupancy record as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyStatus {
    Booked,
    #[serde(rename = "checkin")]
    CheckIn,
    Maintenance,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    pub reference: String,
    pub claim: Claim,
    pub guests: GuestCount,
}

impl OccupancyRecord {
    pub fn stay(reference: impl Into<String>, range: StayRange, guests: GuestCount) -> Self {
        Self {
            reference: reference.into(),
            claim: Claim::Stay { range, status: StayStatus::Booked },
            guests,
        }
    }

    pub fn hold(reference: impl Into<String>, since: NaiveDate, reason: HoldReason) -> Self {
        Self {
            reference: reference.into(),
            claim: Claim::OpenHold { since, reason },
            guests: GuestCount::default(),
        }
    }

    /// Sort key: first night claimed.
    pub fn starts_on(&self) -> NaiveDate {
        match &self.claim {
            Claim::Stay { range, .. } => range.check_in,
            Claim::OpenHold { since, .. } => *since,
        }
    }

    /// `None` for open-ended holds.
    pub fn check_out(&self) -> Option<NaiveDate> {
        match &self.claim {
            Claim::Stay { range, .. } => Some(range.check_out),
            Claim::OpenHold { .. } => None,
        }
    }

    pub fn status(&self) -> OccupancyStatus {
        match &self.claim {
            Claim::Stay { status: StayStatus::Booked, .. } => OccupancyStatus::Booked,
            Claim::Stay { status: StayStatus::CheckedIn, .. } => OccupancyStatus::CheckIn,
            Claim::OpenHold { reason: HoldReason::Maintenance, .. } => OccupancyStatus::Maintenance,
            Claim::OpenHold { reason: HoldReason::Turnover, .. } => OccupancyStatus::Pending,
        }
    }

    /// Whether this record makes `window` unbookable.
    pub fn blocks(&self, window: &StayRange) -> bool {
        match &self.claim {
            Claim::Stay { range, .. } => range.overlaps(window),
            Claim::OpenHold { since, .. } => window.check_out > *since,
        }
    }
}

/// A room unit and its claims, sorted by `starts_on`.
#[derive(Debug, Clone)]
pub struct RoomUnitState {
    pub id: UnitId,
    pub room_type: Ulid,
    pub records: Vec<OccupancyRecord>,
}

impl RoomUnitState {
    pub fn new(id: UnitId, room_type: Ulid) -> Self {
        Self {
            id,
            room_type,
            records: Vec::new(),
        }
    }

    /// Insert record maintaining sort order by start day.
    pub fn insert_record(&mut self, record: OccupancyRecord) {
        let start = record.starts_on();
        let pos = self.records.partition_point(|r| r.starts_on() <= start);
        self.records.insert(pos, record);
    }

    /// Remove the record with this reference, leaving siblings untouched.
    pub fn pull_record(&mut self, reference: &str) -> Option<OccupancyRecord> {
        let pos = self.records.iter().position(|r| r.reference == reference)?;
        Some(self.records.remove(pos))
    }

    pub fn record(&self, reference: &str) -> Option<&OccupancyRecord> {
        self.records.iter().find(|r| r.reference == reference)
    }

    /// Mutate a record in place, re-sorting if its start moved.
    pub fn update_record(&mut self, reference: &str, f: impl FnOnce(&mut OccupancyRecord)) -> bool {
        match self.pull_record(reference) {
            Some(mut record) => {
                f(&mut record);
                self.insert_record(record);
                true
            }
            None => false,
        }
    }

    /// Records that make `window` unbookable.
    /// Records starting on or after `window.check_out` can never block it.
    pub fn blocking<'a>(&'a self, window: &'a StayRange) -> impl Iterator<Item = &'a OccupancyRecord> + 'a {
        let right_bound = self
            .records
            .partition_point(|r| r.starts_on() < window.check_out);
        self.records[..right_bound]
            .iter()
            .filter(move |r| r.blocks(window))
    }

    /// Latest stay check-out falling on or after `day`.
    pub fn latest_checkout_from(&self, day: NaiveDate) -> Option<NaiveDate> {
        self.records
            .iter()
            .filter_map(|r| r.check_out())
            .filter(|co| *co >= day)
            .max()
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomType {
    pub id: Ulid,
    pub category: String,
    pub nightly_rate: Money,
    /// Tax rate in basis points (1800 = 18%).
    pub tax_rate_bp: u32,
    /// Guests included in the nightly rate.
    pub capacity: u32,
    /// Per night, per guest above capacity.
    pub extra_guest_charge: Money,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    #[serde(rename = "booked")]
    Booked,
    #[serde(rename = "checkin")]
    CheckedIn,
    #[serde(rename = "checkout")]
    CheckedOut,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Booked => "booked",
            BookingStatus::CheckedIn => "checkin",
            BookingStatus::CheckedOut => "checkout",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::CheckedOut | BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdKind {
    Passport,
    NationalId,
    DrivingLicence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdDocument {
    pub kind: IdKind,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub id_document: Option<IdDocument>,
}

/// What the core knows about payment: settled or not, and how.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub settled: bool,
    pub method: Option<String>,
}

/// Reference to a stored upload; the bytes live elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub file_name: String,
    pub file_path: String,
    pub upload_date: Ms,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub nightly_rate: Money,
    pub nights: u32,
    pub weekend_nights: u32,
    pub extra_guests: u32,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAssignment {
    pub room_type: Ulid,
    pub unit: UnitId,
    pub guests: GuestCount,
    pub price: PriceSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub reference: String,
    pub guest_id: Ulid,
    pub guest: GuestDetails,
    pub stay: StayRange,
    pub rooms: Vec<RoomAssignment>,
    pub status: BookingStatus,
    pub status_timestamps: BTreeMap<BookingStatus, Ms>,
    /// Set once, at checkout (or by a later backfill).
    pub invoice_number: Option<String>,
    pub settlement: Settlement,
    pub documents: Vec<DocumentRef>,
    pub notes: Option<String>,
    pub created_at: Ms,
}

impl Booking {
    pub fn reference_for(id: Ulid) -> String {
        format!("BK-{id}")
    }

    pub fn units(&self) -> impl Iterator<Item = &UnitId> {
        self.rooms.iter().map(|r| &r.unit)
    }

    pub fn total(&self) -> Money {
        self.rooms.iter().map(|r| r.price.total).sum()
    }

    pub fn arrives_at(&self, settings: &Settings) -> Ms {
        instant_at(self.stay.check_in, settings.check_in_time)
    }

    pub fn departs_at(&self, settings: &Settings) -> Ms {
        instant_at(self.stay.check_out, settings.check_out_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub unit: UnitId,
    pub room_type: Ulid,
    pub nights: u32,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

/// Frozen billing view of a booking at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub booking_id: Ulid,
    pub reference: String,
    pub number: Option<String>,
    pub guest_name: String,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub settlement: Settlement,
    pub issued_at: Ms,
}

impl Invoice {
    pub fn snapshot(booking: &Booking, number: Option<String>, issued_at: Ms) -> Self {
        let lines: Vec<InvoiceLine> = booking
            .rooms
            .iter()
            .map(|r| InvoiceLine {
                unit: r.unit.clone(),
                room_type: r.room_type,
                nights: r.price.nights,
                subtotal: r.price.subtotal,
                tax: r.price.tax,
                total: r.price.total,
            })
            .collect();
        Self {
            booking_id: booking.id,
            reference: booking.reference.clone(),
            number,
            guest_name: booking.guest.name.clone(),
            subtotal: lines.iter().map(|l| l.subtotal).sum(),
            tax: lines.iter().map(|l| l.tax).sum(),
            total: lines.iter().map(|l| l.total).sum(),
            lines,
            settlement: booking.settlement.clone(),
            issued_at,
        }
    }
}

// ── Housekeeping ─────────────────────────────────────────────────

/// Which reservation event a housekeeping task serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    #[serde(rename = "checkin")]
    CheckIn,
    #[serde(rename = "checkout")]
    CheckOut,
    Available,
    Booked,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "maintenance")]
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HousekeepingTask {
    pub id: Ulid,
    pub unit: UnitId,
    pub reference: Option<String>,
    pub reservation_status: ReservationStatus,
    pub status: TaskStatus,
    pub expected_start: Ms,
    /// `None` when housekeeping is under manual control.
    pub expected_end: Option<Ms>,
    pub actual_start: Option<Ms>,
    pub actual_end: Option<Ms>,
    pub notes: Option<String>,
    pub created_at: Ms,
}

impl HousekeepingTask {
    pub fn is_active(&self) -> bool {
        self.status != TaskStatus::Completed
    }

    /// Whether completing this task releases an occupancy hold.
    pub fn holds_unit(&self) -> bool {
        matches!(
            self.reservation_status,
            ReservationStatus::CheckOut | ReservationStatus::Maintenance
        )
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types: flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SettingsUpdated {
        settings: Settings,
    },
    RoomTypeCreated {
        room_type: RoomType,
    },
    RoomUnitCreated {
        id: UnitId,
        room_type: Ulid,
    },
    OccupancyAdded {
        unit: UnitId,
        record: OccupancyRecord,
    },
    OccupancyStatusSet {
        unit: UnitId,
        reference: String,
        status: StayStatus,
    },
    OccupancyRangeSet {
        unit: UnitId,
        reference: String,
        range: StayRange,
        guests: GuestCount,
    },
    /// Targeted pull by reference.
    OccupancyReleased {
        unit: UnitId,
        reference: String,
    },
    /// Turns the reference's stay into an open turnover hold, or adds one.
    TurnoverOpened {
        unit: UnitId,
        reference: String,
        since: NaiveDate,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingRevised {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        status: BookingStatus,
        at: Ms,
        invoice_number: Option<String>,
    },
    InvoiceIssued {
        invoice: Invoice,
    },
    InvoiceNumberAssigned {
        booking_id: Ulid,
        number: String,
    },
    FinancialYearOpened {
        year: i32,
        sequence: u64,
    },
    InvoiceSequenceAdvanced {
        year: i32,
        sequence: u64,
    },
    TaskCreated {
        task: HousekeepingTask,
    },
    TaskStarted {
        id: Ulid,
        at: Ms,
    },
    TaskCompleted {
        id: Ulid,
        at: Ms,
    },
    TaskDeleted {
        id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConflict {
    pub unit: UnitId,
    pub dates: Vec<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    pub unit: UnitId,
    pub free_days: Vec<NaiveDate>,
}

/// Why an allocation was refused, and where the rooms are free instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub conflicts: Vec<RoomConflict>,
    pub alternatives: Vec<Alternative>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for c in &self.conflicts {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "room {} taken on", c.unit)?;
            for d in &c.dates {
                write!(f, " {d}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomUnitInfo {
    pub id: UnitId,
    pub room_type: Ulid,
    pub records: usize,
}

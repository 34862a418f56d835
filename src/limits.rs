use crate::model::{HOUR_MS, Ms};

pub const MAX_UNITS: usize = 10_000;
pub const MAX_ROOM_TYPES: usize = 1_000;
pub const MAX_RECORDS_PER_UNIT: usize = 5_000;
pub const MAX_ROOMS_PER_BOOKING: usize = 50;
pub const MAX_STAY_NIGHTS: i64 = 365;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_DOCUMENTS: usize = 10;
pub const MAX_UNIT_ID_LEN: usize = 32;

/// Upper bounds on room-type charges, in minor units.
pub const MAX_NIGHTLY_RATE: i64 = 100_000_000;
pub const MAX_EXTRA_GUEST_CHARGE: i64 = 10_000_000;
/// 100% tax.
pub const MAX_TAX_RATE_BP: u32 = 10_000;
pub const MAX_WEEKEND_HIKE_PERCENT: u32 = 500;

/// Completed tasks kept for lookups and idempotent completion.
pub const MAX_COMPLETED_TASKS: usize = 2_000;

/// Earliest/latest calendar year a stay may touch.
pub const MIN_STAY_YEAR: i32 = 2000;
pub const MAX_STAY_YEAR: i32 = 2200;

/// How far forward a conflict report looks for free days.
pub const FREE_DAY_HORIZON_DAYS: u32 = 90;

/// A prep task for an arriving booking needs this much time before check-in.
pub const BOOKED_TASK_LEAD_MS: Ms = 2 * HOUR_MS;

/// Attempts per side effect before it is reported undelivered.
pub const MAX_EFFECT_ATTEMPTS: u32 = 3;

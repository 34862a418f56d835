use chrono::Datelike;

use crate::config::Settings;
use crate::engine::EngineError;
use crate::model::{GuestCount, Money, PriceSnapshot, RoomType, StayRange};

/// `amount × bp / 10_000`, rounded half-up. `None` on overflow.
fn apply_basis_points(amount: Money, bp: u32) -> Option<Money> {
    Some(amount.checked_mul(Money::from(bp))?.checked_add(5_000)?.div_euclid(10_000))
}

fn out_of_range() -> EngineError {
    EngineError::LimitExceeded("price out of range")
}

/// Price one room for a stay: nightly rate, weekend hike on configured
/// weekdays, per-night surcharge for guests above capacity, then tax.
pub fn quote(
    room_type: &RoomType,
    stay: &StayRange,
    guests: GuestCount,
    settings: &Settings,
) -> Result<PriceSnapshot, EngineError> {
    let extra_guests = guests.total().saturating_sub(room_type.capacity);
    let extra_per_night = Money::from(extra_guests)
        .checked_mul(room_type.extra_guest_charge)
        .ok_or_else(out_of_range)?;
    let hike_bp = settings.weekend_hike_percent.checked_mul(100).ok_or_else(out_of_range)?;
    let weekend_rate = apply_basis_points(room_type.nightly_rate, hike_bp)
        .and_then(|hike| room_type.nightly_rate.checked_add(hike))
        .ok_or_else(out_of_range)?;

    let mut nights = 0u32;
    let mut weekend_nights = 0u32;
    let mut subtotal: Money = 0;
    for night in stay.days() {
        nights += 1;
        let rate = if settings.weekend_days.contains(&night.weekday()) {
            weekend_nights += 1;
            weekend_rate
        } else {
            room_type.nightly_rate
        };
        subtotal = rate
            .checked_add(extra_per_night)
            .and_then(|night_total| subtotal.checked_add(night_total))
            .ok_or_else(out_of_range)?;
    }

    let tax = apply_basis_points(subtotal, room_type.tax_rate_bp).ok_or_else(out_of_range)?;
    Ok(PriceSnapshot {
        nightly_rate: room_type.nightly_rate,
        nights,
        weekend_nights,
        extra_guests,
        subtotal,
        tax,
        total: subtotal.checked_add(tax).ok_or_else(out_of_range)?,
    })
}

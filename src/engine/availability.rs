use chrono::NaiveDate;

use crate::model::*;

// ── Availability resolution ───────────────────────────────────────

/// Whether `window` is bookable on `unit`.
///
/// `ignore` names a reference whose own record does not count, so a booking
/// being edited never conflicts with itself.
pub fn is_free(unit: &RoomUnitState, window: &StayRange, ignore: Option<&str>) -> bool {
    unit.blocking(window)
        .all(|r| Some(r.reference.as_str()) == ignore)
}

/// Nights of `window` that some other record blocks, sorted and unique.
pub fn blocked_nights(unit: &RoomUnitState, window: &StayRange, ignore: Option<&str>) -> Vec<NaiveDate> {
    let mut nights: Vec<NaiveDate> = Vec::new();
    for record in unit.blocking(window) {
        if Some(record.reference.as_str()) == ignore {
            continue;
        }
        nights.extend(window.days().filter(|day| match &record.claim {
            Claim::Stay { range, .. } => range.contains_day(*day),
            Claim::OpenHold { since, .. } => day >= since,
        }));
    }
    nights.sort();
    nights.dedup();
    nights
}

/// Days from `from` (inclusive) within `horizon_days` whose single night is free.
pub fn free_days(
    unit: &RoomUnitState,
    from: NaiveDate,
    horizon_days: u32,
    ignore: Option<&str>,
) -> Vec<NaiveDate> {
    from.iter_days()
        .take(horizon_days as usize)
        .filter(|day| StayRange::night_of(*day).is_some_and(|night| is_free(unit, &night, ignore)))
        .collect()
}

/// Parts of `requested` not already covered by `held`, in order.
pub fn subtract_range(requested: &StayRange, held: &StayRange) -> Vec<StayRange> {
    if !requested.overlaps(held) {
        return vec![*requested];
    }
    let mut rest = Vec::new();
    if requested.check_in < held.check_in {
        rest.push(StayRange::new(requested.check_in, held.check_in));
    }
    if held.check_out < requested.check_out {
        rest.push(StayRange::new(held.check_out, requested.check_out));
    }
    rest
}

/// Windows that must be re-validated when a stay on a unit changes.
///
/// Nights the booking already holds on the unit are not re-checked, so a
/// stay extended past its original checkout only validates the extension.
pub fn revalidation_windows(held: Option<&StayRange>, requested: &StayRange) -> Vec<StayRange> {
    match held {
        Some(held) => subtract_range(requested, held),
        None => vec![*requested],
    }
}

/// Conflict entry for `unit` across `windows`, if any night is blocked.
pub fn conflict_on(unit: &RoomUnitState, windows: &[StayRange], ignore: Option<&str>) -> Option<RoomConflict> {
    let mut dates: Vec<NaiveDate> = windows
        .iter()
        .flat_map(|w| blocked_nights(unit, w, ignore))
        .collect();
    if dates.is_empty() {
        return None;
    }
    dates.sort();
    dates.dedup();
    Some(RoomConflict {
        unit: unit.id.clone(),
        dates,
    })
}

pub fn alternative_for(unit: &RoomUnitState, from: NaiveDate, horizon_days: u32, ignore: Option<&str>) -> Alternative {
    Alternative {
        unit: unit.id.clone(),
        free_days: free_days(unit, from, horizon_days, ignore),
    }
}

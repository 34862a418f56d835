use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::availability::{alternative_for, conflict_on};
use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn check_record_room(unit: &RoomUnitState) -> Result<(), EngineError> {
    if unit.records.len() >= MAX_RECORDS_PER_UNIT {
        return Err(EngineError::LimitExceeded("too many occupancy records on unit"));
    }
    Ok(())
}

/// One unit's share of an allocation check.
pub(crate) struct UnitCheck<'a> {
    pub unit: &'a RoomUnitState,
    pub windows: Vec<StayRange>,
}

/// Validate every unit's windows under the caller's write locks.
///
/// On any conflict the error carries every conflicting room/date pair and,
/// per conflicting room, the free days found scanning forward from `from`.
pub(crate) fn ensure_free(checks: &[UnitCheck<'_>], ignore: Option<&str>, from: NaiveDate) -> Result<(), EngineError> {
    let mut report = ConflictReport::default();
    for check in checks {
        if let Some(conflict) = conflict_on(check.unit, &check.windows, ignore) {
            report.conflicts.push(conflict);
            report
                .alternatives
                .push(alternative_for(check.unit, from, FREE_DAY_HORIZON_DAYS, ignore));
        }
    }
    if report.is_empty() {
        return Ok(());
    }
    metrics::counter!(crate::observability::ALLOCATION_CONFLICTS_TOTAL).increment(1);
    tracing::debug!("allocation refused: {report}");
    Err(EngineError::Conflict(report))
}

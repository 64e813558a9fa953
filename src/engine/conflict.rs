use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if range.start > range.end {
        return Err(EngineError::InvalidArgument("start date after end date"));
    }
    if range.start.year() < MIN_BOOKING_YEAR || range.end.year() > MAX_BOOKING_YEAR {
        return Err(EngineError::LimitExceeded("booking date out of range"));
    }
    if range.days() > MAX_RENTAL_DAYS {
        return Err(EngineError::LimitExceeded("rental too long"));
    }
    Ok(())
}

/// True iff at least one active (APPROVED/IN_PROCESS) booking for this
/// vehicle overlaps the inclusive range. `exclude` lets a booking being
/// re-evaluated ignore itself.
pub fn has_conflict(vs: &VehicleState, range: &DateRange, exclude: Option<Ulid>) -> bool {
    vs.overlapping(range)
        .any(|b| b.status.is_active() && Some(b.id) != exclude)
}

/// Approval-time structural guard, capacity-aware: approving one more
/// booking for `range` must not push the number of concurrently active
/// bookings above `total_stock` on any day. With a single-unit fleet this
/// degenerates to `has_conflict`.
pub(crate) fn check_bookable(
    vs: &VehicleState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    if vs.total_stock <= 1 {
        // Fast path: any overlapping active booking is a conflict.
        if has_conflict(vs, range, exclude) {
            return Err(EngineError::Conflict(vs.id));
        }
        return Ok(());
    }

    // Day sweep over the active bookings clamped to the query range:
    // +1 on the first held day, -1 the day after the last. Decrements sort
    // first so back-to-back rentals do not produce a false peak.
    let mut events: Vec<(NaiveDate, i32)> = Vec::new();
    for b in vs.overlapping(range) {
        if !b.status.is_active() || Some(b.id) == exclude {
            continue;
        }
        let seg_start = b.range.start.max(range.start);
        let seg_end = b.range.end.min(range.end);
        events.push((seg_start, 1));
        if let Some(after) = seg_end.checked_add_days(Days::new(1)) {
            events.push((after, -1));
        }
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut count: i32 = 0;
    for (_, delta) in &events {
        count += delta;
        if count >= vs.total_stock as i32 {
            return Err(EngineError::Conflict(vs.id));
        }
    }
    Ok(())
}

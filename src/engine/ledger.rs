//! Per-vehicle stock arithmetic. Every function here runs while the
//! caller holds the vehicle's write lock; checks are made before the WAL
//! append and the matching mutation is applied after it, so replay walks
//! the same code path and the counters reconstruct exactly.

use crate::model::VehicleState;

use super::EngineError;

/// Reservation precondition: `available >= qty`.
pub fn check_reserve(vs: &VehicleState, qty: u32) -> Result<(), EngineError> {
    if vs.available < qty {
        return Err(EngineError::NoAvailability(vs.id));
    }
    Ok(())
}

/// Take `qty` units out of the available pool.
pub fn reserve(vs: &mut VehicleState, qty: u32) {
    vs.available = vs.available.saturating_sub(qty);
    debug_assert!(vs.available <= vs.total_stock);
}

/// Return `qty` units to the available pool, clamped at `total_stock`.
/// Clamping indicates a double-release upstream; it is flagged rather than
/// amplified into a broken invariant.
pub fn release(vs: &mut VehicleState, qty: u32) -> u32 {
    let headroom = vs.total_stock - vs.available;
    if qty > headroom {
        tracing::warn!(
            vehicle = %vs.id,
            qty,
            headroom,
            "release clamped: availability would exceed total stock"
        );
    }
    let restored = qty.min(headroom);
    vs.available += restored;
    restored
}

/// Grant `units` of new stock: both counters rise, the new units enter the
/// pool already available.
pub fn grant(vs: &mut VehicleState, units: u32) {
    vs.total_stock += units;
    vs.available += units;
}

/// Retirement precondition: removing `units` from the fleet must not drive
/// availability negative (reserved units cannot be retired out from under
/// their bookings).
pub fn check_retire(vs: &VehicleState, units: u32) -> Result<(), EngineError> {
    if vs.available < units {
        return Err(EngineError::InvalidArgument(
            "stock retirement exceeds available units",
        ));
    }
    Ok(())
}

/// Remove `units` from the fleet. Caller must have passed `check_retire`.
pub fn retire(vs: &mut VehicleState, units: u32) {
    vs.total_stock = vs.total_stock.saturating_sub(units);
    vs.available = vs.available.saturating_sub(units);
}

/// Move the ledger to a new absolute total; used by vehicle edits where
/// the caller supplies the full replacement state.
pub fn set_total_stock(vs: &mut VehicleState, new_total: u32) {
    if new_total >= vs.total_stock {
        grant(vs, new_total - vs.total_stock);
    } else {
        retire(vs, vs.total_stock - new_total);
    }
}

/// Debug-only invariant check: `0 <= available <= total_stock`.
pub fn assert_invariant(vs: &VehicleState, context: &str) {
    debug_assert!(
        vs.available <= vs.total_stock,
        "ledger invariant broken after {context}: vehicle {} has available={} > total_stock={}",
        vs.id,
        vs.available,
        vs.total_stock
    );
}

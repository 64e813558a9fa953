use ulid::Ulid;

use crate::model::*;

use super::conflict::{has_conflict, validate_range};
use super::{Engine, EngineError};

impl Engine {
    pub async fn list_vehicles(&self) -> Vec<VehicleInfo> {
        let arcs: Vec<_> = self.vehicles.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for vs in arcs {
            let guard = vs.read().await;
            out.push(VehicleInfo {
                id: guard.id,
                name: guard.name.clone(),
                spec: guard.spec.clone(),
                total_stock: guard.total_stock,
                available: guard.available,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// The per-vehicle ledger counters.
    pub async fn stock_levels(&self, vehicle_id: Ulid) -> Result<StockLevels, EngineError> {
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(StockLevels {
            total_stock: guard.total_stock,
            available: guard.available,
        })
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<BookingRecord, EngineError> {
        let vehicle_id = self
            .get_vehicle_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        let b = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        Ok(booking_record(&guard, b))
    }

    /// Bookings, newest first (by booking date).
    pub async fn list_bookings(&self, filter: BookingFilter) -> Vec<BookingRecord> {
        let arcs: Vec<_> = self.vehicles.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for vs in arcs {
            let guard = vs.read().await;
            for b in &guard.bookings {
                let keep = match filter {
                    BookingFilter::All => true,
                    BookingFilter::Customer(id) => b.customer.id == id,
                    BookingFilter::Branch(id) => b.branch.id == id,
                };
                if keep {
                    out.push(booking_record(&guard, b));
                }
            }
        }
        out.sort_by(|a, b| b.booking_date.cmp(&a.booking_date));
        out
    }

    pub async fn get_request(&self, id: Ulid) -> Result<RequestRecord, EngineError> {
        let vehicle_id = self
            .get_vehicle_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        let r = guard.request(id).ok_or(EngineError::NotFound(id))?;
        Ok(request_record(&guard, r))
    }

    /// Stock requests, newest first (by request date).
    pub async fn list_requests(&self, filter: RequestFilter) -> Vec<RequestRecord> {
        let arcs: Vec<_> = self.vehicles.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for vs in arcs {
            let guard = vs.read().await;
            for r in &guard.requests {
                let keep = match filter {
                    RequestFilter::All => true,
                    RequestFilter::Branch(id) => r.branch.id == id,
                };
                if keep {
                    out.push(request_record(&guard, r));
                }
            }
        }
        out.sort_by(|a, b| b.request_date.cmp(&a.request_date));
        out
    }

    /// Does any active booking overlap the range? Read-only surface over
    /// the conflict detector.
    pub async fn conflict_check(
        &self,
        vehicle_id: Ulid,
        range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        validate_range(&range)?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(has_conflict(&guard, &range, exclude))
    }

    /// Dashboard counters across the whole fleet.
    pub async fn fleet_stats(&self) -> FleetStats {
        let arcs: Vec<_> = self.vehicles.iter().map(|e| e.value().clone()).collect();
        let mut stats = FleetStats::default();
        for vs in arcs {
            let guard = vs.read().await;
            stats.vehicles += 1;
            if guard.available > 0 {
                stats.vehicles_with_availability += 1;
            }
            stats.total_stock += guard.total_stock as u64;
            stats.total_available += guard.available as u64;
        }
        stats
    }
}

fn booking_record(vs: &VehicleState, b: &Booking) -> BookingRecord {
    BookingRecord {
        id: b.id,
        vehicle_id: vs.id,
        vehicle_name: vs.name.clone(),
        customer: b.customer.clone(),
        branch: b.branch.clone(),
        range: b.range,
        total_amount: b.total_amount,
        status: b.status,
        booking_date: b.booking_date,
        approved_date: b.approved_date,
        notes: b.notes.clone(),
    }
}

fn request_record(vs: &VehicleState, r: &StockRequest) -> RequestRecord {
    RequestRecord {
        id: r.id,
        vehicle_id: vs.id,
        vehicle_name: vs.name.clone(),
        branch: r.branch.clone(),
        requested: r.requested,
        approved: r.approved,
        status: r.status,
        request_date: r.request_date,
        approved_date: r.approved_date,
        notes: r.notes.clone(),
    }
}

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_bookable, now_utc, validate_range};
use super::ledger;
use super::{Engine, EngineError, WalCommand};

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::InvalidArgument("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_notes(notes: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = notes
        && n.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
    Ok(())
}

fn validate_spec(spec: &VehicleSpec) -> Result<(), EngineError> {
    if spec.year < MIN_MODEL_YEAR || spec.year > MAX_MODEL_YEAR {
        return Err(EngineError::InvalidArgument("model year out of range"));
    }
    if spec.price_per_day < Decimal::ZERO {
        return Err(EngineError::InvalidArgument("price per day must not be negative"));
    }
    if spec.seating_capacity < MIN_SEATING_CAPACITY {
        return Err(EngineError::InvalidArgument("seating capacity too small"));
    }
    if spec.features.len() > MAX_FEATURES {
        return Err(EngineError::LimitExceeded("too many features"));
    }
    if spec.features.iter().any(|f| f.len() > MAX_FEATURE_LEN) {
        return Err(EngineError::LimitExceeded("feature tag too long"));
    }
    Ok(())
}

impl Engine {
    // ── Vehicle onboarding ───────────────────────────────────

    pub async fn add_vehicle(
        &self,
        id: Ulid,
        name: String,
        spec: VehicleSpec,
        total_stock: u32,
    ) -> Result<(), EngineError> {
        if self.vehicles.len() >= MAX_VEHICLES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        validate_name(&name)?;
        validate_spec(&spec)?;
        if total_stock > MAX_TOTAL_STOCK {
            return Err(EngineError::LimitExceeded("total stock too large"));
        }
        if self.vehicles.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::VehicleAdded { id, name: name.clone(), spec: spec.clone(), total_stock };
        self.wal_append(&event).await?;
        let vs = VehicleState::new(id, name, spec, total_stock);
        self.vehicles.insert(id, Arc::new(RwLock::new(vs)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Descriptive edit. A changed `total_stock` shifts availability by the
    /// same delta; a reduction below the reserved count is rejected.
    pub async fn update_vehicle(
        &self,
        id: Ulid,
        name: String,
        spec: VehicleSpec,
        total_stock: u32,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        validate_spec(&spec)?;
        if total_stock > MAX_TOTAL_STOCK {
            return Err(EngineError::LimitExceeded("total stock too large"));
        }
        let vs = self.get_vehicle(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = vs.write().await;
        if total_stock < guard.total_stock {
            ledger::check_retire(&guard, guard.total_stock - total_stock)?;
        }

        let event = Event::VehicleUpdated { id, name, spec, total_stock };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    pub async fn remove_vehicle(&self, id: Ulid) -> Result<(), EngineError> {
        let vs = self.get_vehicle(&id).ok_or(EngineError::NotFound(id))?;
        let guard = vs.write().await;
        if guard.bookings.iter().any(|b| b.status.holds_inventory()) {
            return Err(EngineError::InvalidArgument(
                "vehicle has bookings holding inventory",
            ));
        }

        let event = Event::VehicleRemoved { id };
        self.wal_append(&event).await?;
        for b in &guard.bookings {
            self.entity_to_vehicle.remove(&b.id);
        }
        for r in &guard.requests {
            self.entity_to_vehicle.remove(&r.id);
        }
        self.vehicles.remove(&id);
        self.notify.send(id, &event);
        Ok(())
    }

    // ── Booking workflow ─────────────────────────────────────

    /// Reserve one unit and persist the booking as PENDING, atomically:
    /// the reservation and the record commit as a single WAL event applied
    /// under the vehicle's write lock. Fails with `NoAvailability` (and no
    /// mutation) when the pool is exhausted.
    pub async fn create_booking(
        &self,
        id: Ulid,
        vehicle_id: Ulid,
        customer: Party,
        branch: Party,
        range: DateRange,
        total_amount: Decimal,
    ) -> Result<(), EngineError> {
        validate_range(&range)?;
        validate_name(&customer.name)?;
        validate_name(&branch.name)?;
        if total_amount < Decimal::ZERO {
            return Err(EngineError::InvalidArgument("total amount must not be negative"));
        }
        if self.entity_to_vehicle.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many bookings on vehicle"));
        }

        ledger::check_reserve(&guard, 1)?;

        let event = Event::BookingCreated {
            id,
            vehicle_id,
            customer,
            branch,
            range,
            total_amount,
            booking_date: now_utc(),
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    /// PENDING → APPROVED. Also runs the structural date guard: approval
    /// must not oversubscribe the fleet on any day of the range.
    pub async fn approve_booking(
        &self,
        id: Ulid,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        validate_notes(&notes)?;
        let (vehicle_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        let current = booking.status;
        let range = booking.range;
        if current.next(BookingAction::Approve).is_none() {
            return Err(EngineError::InvalidTransition {
                current: current.as_str(),
                action: BookingAction::Approve.as_str(),
            });
        }
        check_bookable(&guard, &range, Some(id))?;

        let event = Event::BookingApproved {
            id,
            vehicle_id,
            approved_date: now_utc(),
            notes,
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    /// PENDING → REJECTED; returns the unit reserved at creation.
    pub async fn reject_booking(
        &self,
        id: Ulid,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        validate_notes(&notes)?;
        let (vehicle_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?.status;
        if current.next(BookingAction::Reject).is_none() {
            return Err(EngineError::InvalidTransition {
                current: current.as_str(),
                action: BookingAction::Reject.as_str(),
            });
        }

        let event = Event::BookingRejected { id, vehicle_id, notes };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    /// APPROVED → IN_PROCESS (the customer picked the vehicle up).
    pub async fn start_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (vehicle_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?.status;
        if current.next(BookingAction::Start).is_none() {
            return Err(EngineError::InvalidTransition {
                current: current.as_str(),
                action: BookingAction::Start.as_str(),
            });
        }

        let event = Event::BookingStarted { id, vehicle_id };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    /// IN_PROCESS → COMPLETED; the unit re-enters the available pool.
    pub async fn complete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (vehicle_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?.status;
        if current.next(BookingAction::Complete).is_none() {
            return Err(EngineError::InvalidTransition {
                current: current.as_str(),
                action: BookingAction::Complete.as_str(),
            });
        }

        let event = Event::BookingCompleted { id, vehicle_id };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    /// APPROVED/IN_PROCESS → CANCELLED; releases the unit.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        validate_notes(&notes)?;
        let (vehicle_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?.status;
        if current.next(BookingAction::Cancel).is_none() {
            return Err(EngineError::InvalidTransition {
                current: current.as_str(),
                action: BookingAction::Cancel.as_str(),
            });
        }

        let event = Event::BookingCancelled { id, vehicle_id, notes };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    /// Hard delete, permitted in any status. A booking still holding its
    /// reserved unit releases it on the way out so stock cannot leak.
    pub async fn delete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (vehicle_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.booking(id).is_none() {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::BookingDeleted { id, vehicle_id };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    // ── Stock request workflow ───────────────────────────────

    /// Persist a PENDING replenishment request. Informational until
    /// approved: no ledger effect.
    pub async fn create_stock_request(
        &self,
        id: Ulid,
        vehicle_id: Ulid,
        branch: Party,
        requested: u32,
    ) -> Result<(), EngineError> {
        if requested == 0 {
            return Err(EngineError::InvalidArgument(
                "requested quantity must be positive",
            ));
        }
        if requested > MAX_REQUEST_QUANTITY {
            return Err(EngineError::LimitExceeded("requested quantity too large"));
        }
        validate_name(&branch.name)?;
        if self.entity_to_vehicle.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;
        if guard.requests.len() >= MAX_REQUESTS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many requests on vehicle"));
        }

        let event = Event::StockRequested {
            id,
            vehicle_id,
            branch,
            requested,
            request_date: now_utc(),
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    /// Resolve a PENDING request. A zero grant rejects; a grant below the
    /// requested quantity partially approves; anything else (clamped to the
    /// requested quantity) fully approves. Non-zero grants enter the fleet
    /// atomically with the status change.
    pub async fn approve_stock_request(
        &self,
        id: Ulid,
        grant: Grant,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        validate_notes(&notes)?;
        let (vehicle_id, mut guard) = self.resolve_entity_write(&id).await?;
        let request = guard.request(id).ok_or(EngineError::NotFound(id))?;
        if request.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                current: request.status.as_str(),
                action: "approve",
            });
        }
        let units = grant.resolve(request.requested);

        let event = if units == 0 {
            Event::StockDenied {
                id,
                vehicle_id,
                approved_date: Some(now_utc()),
                notes,
            }
        } else {
            if guard.total_stock.saturating_add(units) > MAX_TOTAL_STOCK {
                return Err(EngineError::LimitExceeded("total stock too large"));
            }
            Event::StockGranted {
                id,
                vehicle_id,
                approved: units,
                approved_date: now_utc(),
                notes,
            }
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    /// Same resolution as `approve_stock_request`, but the quantity is
    /// mandatory and must be positive: this path makes a non-zero partial
    /// grant explicit at the interface.
    pub async fn partial_approve_stock_request(
        &self,
        id: Ulid,
        units: u32,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        if units == 0 {
            return Err(EngineError::InvalidArgument(
                "partial approval quantity must be positive",
            ));
        }
        self.approve_stock_request(id, Grant::Units(units), notes).await
    }

    /// PENDING → REJECTED; no ledger effect.
    pub async fn reject_stock_request(
        &self,
        id: Ulid,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        validate_notes(&notes)?;
        let (vehicle_id, mut guard) = self.resolve_entity_write(&id).await?;
        let request = guard.request(id).ok_or(EngineError::NotFound(id))?;
        if request.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                current: request.status.as_str(),
                action: "reject",
            });
        }

        let event = Event::StockDenied { id, vehicle_id, approved_date: None, notes };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    /// Remove the request record. Stock already granted stays granted.
    pub async fn delete_stock_request(&self, id: Ulid) -> Result<(), EngineError> {
        let (vehicle_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.request(id).is_none() {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::StockRequestDeleted { id, vehicle_id };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await
    }

    // ── WAL compaction ───────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Bookings replay as create + status
    /// events so the ledger counters reconstruct through the same code
    /// path as live traffic.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let vehicle_ids: Vec<Ulid> = self.vehicles.iter().map(|e| *e.key()).collect();
        for id in vehicle_ids {
            let entry = match self.vehicles.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let vs = entry.value().clone();
            let guard = vs.try_read().expect("compact: uncontended read");

            events.push(Event::VehicleAdded {
                id: guard.id,
                name: guard.name.clone(),
                spec: guard.spec.clone(),
                total_stock: guard.total_stock,
            });

            // Terminal bookings replay as a reserve/release pair and need a
            // transient unit of headroom; emit them before the bookings that
            // still hold inventory so the pool is never transiently empty.
            let (terminal, holding): (Vec<_>, Vec<_>) = guard
                .bookings
                .iter()
                .partition(|b| b.status.is_terminal());
            for b in terminal.into_iter().chain(holding) {
                events.push(Event::BookingCreated {
                    id: b.id,
                    vehicle_id: guard.id,
                    customer: b.customer.clone(),
                    branch: b.branch.clone(),
                    range: b.range,
                    total_amount: b.total_amount,
                    booking_date: b.booking_date,
                });
                if let Some(approved_date) = b.approved_date {
                    events.push(Event::BookingApproved {
                        id: b.id,
                        vehicle_id: guard.id,
                        approved_date,
                        notes: b.notes.clone(),
                    });
                }
                match b.status {
                    BookingStatus::Pending | BookingStatus::Approved => {}
                    BookingStatus::Rejected => events.push(Event::BookingRejected {
                        id: b.id,
                        vehicle_id: guard.id,
                        notes: b.notes.clone(),
                    }),
                    BookingStatus::InProcess => events.push(Event::BookingStarted {
                        id: b.id,
                        vehicle_id: guard.id,
                    }),
                    BookingStatus::Completed => events.push(Event::BookingCompleted {
                        id: b.id,
                        vehicle_id: guard.id,
                    }),
                    BookingStatus::Cancelled => events.push(Event::BookingCancelled {
                        id: b.id,
                        vehicle_id: guard.id,
                        notes: b.notes.clone(),
                    }),
                }
            }

            let mut granted_total: u32 = 0;
            for r in &guard.requests {
                events.push(Event::StockRequested {
                    id: r.id,
                    vehicle_id: guard.id,
                    branch: r.branch.clone(),
                    requested: r.requested,
                    request_date: r.request_date,
                });
                match r.status {
                    RequestStatus::Pending => {}
                    RequestStatus::Approved | RequestStatus::PartiallyApproved => {
                        granted_total += r.approved;
                        events.push(Event::StockGranted {
                            id: r.id,
                            vehicle_id: guard.id,
                            approved: r.approved,
                            approved_date: r.approved_date.unwrap_or(r.request_date),
                            notes: r.notes.clone(),
                        });
                    }
                    RequestStatus::Rejected => events.push(Event::StockDenied {
                        id: r.id,
                        vehicle_id: guard.id,
                        approved_date: r.approved_date,
                        notes: r.notes.clone(),
                    }),
                }
            }

            // Replayed grants raised total_stock above the snapshot value;
            // normalize back to the authoritative counter.
            if granted_total > 0 {
                events.push(Event::VehicleUpdated {
                    id: guard.id,
                    name: guard.name.clone(),
                    spec: guard.spec.clone(),
                    total_stock: guard.total_stock,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

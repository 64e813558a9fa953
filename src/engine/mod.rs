mod conflict;
mod error;
mod ledger;
mod mutations;
mod queries;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub vehicles: DashMap<Ulid, SharedVehicleState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (booking/stock-request) id → vehicle id
    pub(super) entity_to_vehicle: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a VehicleState (no locking — caller holds the
/// lock). Shared by the mutation path and WAL replay, so the ledger counters
/// reconstruct identically after a restart.
fn apply_to_vehicle(vs: &mut VehicleState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::VehicleUpdated { name, spec, total_stock, .. } => {
            vs.name = name.clone();
            vs.spec = spec.clone();
            ledger::set_total_stock(vs, *total_stock);
        }
        Event::BookingCreated {
            id,
            vehicle_id,
            customer,
            branch,
            range,
            total_amount,
            booking_date,
        } => {
            vs.insert_booking(Booking {
                id: *id,
                customer: customer.clone(),
                branch: branch.clone(),
                range: *range,
                total_amount: *total_amount,
                status: BookingStatus::Pending,
                booking_date: *booking_date,
                approved_date: None,
                notes: None,
            });
            ledger::reserve(vs, 1);
            entity_map.insert(*id, *vehicle_id);
        }
        Event::BookingApproved { id, approved_date, notes, .. } => {
            if let Some(b) = vs.booking_mut(*id) {
                b.status = BookingStatus::Approved;
                b.approved_date = Some(*approved_date);
                b.notes = notes.clone();
            }
        }
        Event::BookingRejected { id, notes, .. } => {
            if let Some(b) = vs.booking_mut(*id) {
                b.status = BookingStatus::Rejected;
                b.notes = notes.clone();
            }
            ledger::release(vs, 1);
        }
        Event::BookingStarted { id, .. } => {
            if let Some(b) = vs.booking_mut(*id) {
                b.status = BookingStatus::InProcess;
            }
        }
        Event::BookingCompleted { id, .. } => {
            if let Some(b) = vs.booking_mut(*id) {
                b.status = BookingStatus::Completed;
            }
            ledger::release(vs, 1);
        }
        Event::BookingCancelled { id, notes, .. } => {
            if let Some(b) = vs.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
                if notes.is_some() {
                    b.notes = notes.clone();
                }
            }
            ledger::release(vs, 1);
        }
        Event::BookingDeleted { id, .. } => {
            if let Some(removed) = vs.remove_booking(*id)
                && removed.status.holds_inventory() {
                    // Hard delete cascades the release so reserved units
                    // cannot leak forever.
                    ledger::release(vs, 1);
                }
            entity_map.remove(id);
        }
        Event::StockRequested { id, vehicle_id, branch, requested, request_date } => {
            vs.requests.push(StockRequest {
                id: *id,
                branch: branch.clone(),
                requested: *requested,
                approved: 0,
                status: RequestStatus::Pending,
                request_date: *request_date,
                approved_date: None,
                notes: None,
            });
            entity_map.insert(*id, *vehicle_id);
        }
        Event::StockGranted { id, approved, approved_date, notes, .. } => {
            if let Some(r) = vs.request_mut(*id) {
                r.approved = *approved;
                r.status = if *approved >= r.requested {
                    RequestStatus::Approved
                } else {
                    RequestStatus::PartiallyApproved
                };
                r.approved_date = Some(*approved_date);
                r.notes = notes.clone();
            }
            ledger::grant(vs, *approved);
        }
        Event::StockDenied { id, approved_date, notes, .. } => {
            if let Some(r) = vs.request_mut(*id) {
                r.approved = 0;
                r.status = RequestStatus::Rejected;
                r.approved_date = *approved_date;
                r.notes = notes.clone();
            }
        }
        Event::StockRequestDeleted { id, .. } => {
            vs.remove_request(*id);
            entity_map.remove(id);
        }
        // VehicleAdded/Removed are handled at the DashMap level, not here
        Event::VehicleAdded { .. } | Event::VehicleRemoved { .. } => {}
    }
    ledger::assert_invariant(vs, "event apply");
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            vehicles: DashMap::new(),
            wal_tx,
            notify,
            entity_to_vehicle: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::VehicleAdded { id, name, spec, total_stock } => {
                    let vs = VehicleState::new(*id, name.clone(), spec.clone(), *total_stock);
                    engine.vehicles.insert(*id, Arc::new(RwLock::new(vs)));
                }
                Event::VehicleRemoved { id } => {
                    if let Some((_, vs)) = engine.vehicles.remove(id) {
                        let guard = vs.try_read().expect("replay: uncontended read");
                        for b in &guard.bookings {
                            engine.entity_to_vehicle.remove(&b.id);
                        }
                        for r in &guard.requests {
                            engine.entity_to_vehicle.remove(&r.id);
                        }
                    }
                }
                other => {
                    let vehicle_id = event_vehicle_id(other);
                    if let Some(vehicle_id) = vehicle_id
                        && let Some(entry) = engine.vehicles.get(&vehicle_id) {
                            let vs_arc = entry.clone();
                            let mut guard = vs_arc.try_write().expect("replay: uncontended write");
                            apply_to_vehicle(&mut guard, other, &engine.entity_to_vehicle);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_vehicle(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    pub fn get_vehicle_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_vehicle.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call: the ledger mutation and the
    /// entity change commit together or not at all, and only while the
    /// vehicle's write lock is held.
    pub(super) async fn persist_and_apply(
        &self,
        vehicle_id: Ulid,
        vs: &mut VehicleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_vehicle(vs, event, &self.entity_to_vehicle);
        self.notify.send(vehicle_id, event);
        Ok(())
    }

    /// Lookup entity → vehicle, get vehicle, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<VehicleState>), EngineError> {
        let vehicle_id = self
            .get_vehicle_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let vs = self
            .get_vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.write_owned().await;
        Ok((vehicle_id, guard))
    }
}

/// Extract the vehicle_id from an event (for non-Add/Remove events).
fn event_vehicle_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { vehicle_id, .. }
        | Event::BookingApproved { vehicle_id, .. }
        | Event::BookingRejected { vehicle_id, .. }
        | Event::BookingStarted { vehicle_id, .. }
        | Event::BookingCompleted { vehicle_id, .. }
        | Event::BookingCancelled { vehicle_id, .. }
        | Event::BookingDeleted { vehicle_id, .. }
        | Event::StockRequested { vehicle_id, .. }
        | Event::StockGranted { vehicle_id, .. }
        | Event::StockDenied { vehicle_id, .. }
        | Event::StockRequestDeleted { vehicle_id, .. } => Some(*vehicle_id),
        Event::VehicleUpdated { id, .. } => Some(*id),
        Event::VehicleAdded { .. } | Event::VehicleRemoved { .. } => None,
    }
}

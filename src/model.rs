use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Inclusive calendar-day rental range: a booking for `[start, end]` holds
/// the vehicle on both boundary days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// Number of calendar days covered, counting both endpoints.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Inclusive overlap: `[s1,e1]` and `[s2,e2]` overlap iff `s1 <= e2 && s2 <= e1`.
    /// Two rentals sharing a boundary day DO overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

// ── Booking lifecycle ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    InProcess,
    Completed,
    Cancelled,
}

/// The actions a caller can take on an existing booking. Creation and
/// deletion are not transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingAction {
    Approve,
    Reject,
    Start,
    Complete,
    Cancel,
}

impl BookingStatus {
    /// The one transition table. `None` means the action is not defined
    /// from this state.
    pub fn next(self, action: BookingAction) -> Option<BookingStatus> {
        use BookingAction::*;
        use BookingStatus::*;
        match (self, action) {
            (Pending, Approve) => Some(Approved),
            (Pending, Reject) => Some(Rejected),
            (Approved, Start) => Some(InProcess),
            (Approved, Cancel) => Some(Cancelled),
            (InProcess, Complete) => Some(Completed),
            (InProcess, Cancel) => Some(Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Completed | BookingStatus::Cancelled
        )
    }

    /// Statuses whose booking owns one reserved ledger unit. Reservation
    /// happens at creation, so Pending holds inventory even though it is
    /// not yet an active conflict source.
    pub fn holds_inventory(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Approved | BookingStatus::InProcess
        )
    }

    /// Statuses the conflict detector considers.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Approved | BookingStatus::InProcess)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::InProcess => "IN_PROCESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl BookingAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingAction::Approve => "approve",
            BookingAction::Reject => "reject",
            BookingAction::Start => "start",
            BookingAction::Complete => "complete",
            BookingAction::Cancel => "cancel",
        }
    }
}

// ── Stock request lifecycle ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Approved,
    PartiallyApproved,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::PartiallyApproved => "PARTIALLY_APPROVED",
            RequestStatus::Rejected => "REJECTED",
        }
    }
}

/// How much of a stock request to grant. An explicit sum type so that
/// "unset" (grant everything) can never be confused with "zero".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Full,
    Units(u32),
}

impl Grant {
    /// Resolve against the requested quantity; explicit grants clamp to it.
    pub fn resolve(self, requested: u32) -> u32 {
        match self {
            Grant::Full => requested,
            Grant::Units(n) => n.min(requested),
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────

/// A customer or branch reference: id plus denormalized display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: Ulid,
    pub name: String,
}

/// Descriptive vehicle attributes. None of these affect the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSpec {
    pub vehicle_type: String,
    pub brand: String,
    pub model: String,
    pub year: i32,
    pub price_per_day: Decimal,
    pub features: Vec<String>,
    pub fuel_type: String,
    pub transmission: String,
    pub seating_capacity: u32,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub customer: Party,
    pub branch: Party,
    pub range: DateRange,
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub booking_date: DateTime<Utc>,
    pub approved_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRequest {
    pub id: Ulid,
    pub branch: Party,
    pub requested: u32,
    pub approved: u32,
    pub status: RequestStatus,
    pub request_date: DateTime<Utc>,
    pub approved_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Authoritative per-vehicle state: the stock ledger plus every booking
/// and stock request referencing the vehicle. All mutation happens while
/// holding this state's write lock.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub id: Ulid,
    pub name: String,
    pub spec: VehicleSpec,
    /// Fleet-wide unit count owned centrally.
    pub total_stock: u32,
    /// Units currently not reserved. Invariant: `available <= total_stock`.
    pub available: u32,
    /// Bookings sorted by `range.start`.
    pub bookings: Vec<Booking>,
    pub requests: Vec<StockRequest>,
}

impl VehicleState {
    pub fn new(id: Ulid, name: String, spec: VehicleSpec, total_stock: u32) -> Self {
        Self {
            id,
            name,
            spec,
            total_stock,
            // New stock enters the pool already available.
            available: total_stock,
            bookings: Vec::new(),
            requests: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by range.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.range.start, |b| b.range.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose range overlaps the query window.
    /// Uses binary search to skip bookings starting after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts after query.end → can't
        // overlap an inclusive range.
        let right_bound = self
            .bookings
            .partition_point(|b| b.range.start <= query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.range.end >= query.start)
    }

    pub fn request(&self, id: Ulid) -> Option<&StockRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    pub fn request_mut(&mut self, id: Ulid) -> Option<&mut StockRequest> {
        self.requests.iter_mut().find(|r| r.id == id)
    }

    pub fn remove_request(&mut self, id: Ulid) -> Option<StockRequest> {
        if let Some(pos) = self.requests.iter().position(|r| r.id == id) {
            Some(self.requests.remove(pos))
        } else {
            None
        }
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleAdded {
        id: Ulid,
        name: String,
        spec: VehicleSpec,
        total_stock: u32,
    },
    VehicleUpdated {
        id: Ulid,
        name: String,
        spec: VehicleSpec,
        total_stock: u32,
    },
    VehicleRemoved {
        id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        vehicle_id: Ulid,
        customer: Party,
        branch: Party,
        range: DateRange,
        total_amount: Decimal,
        booking_date: DateTime<Utc>,
    },
    BookingApproved {
        id: Ulid,
        vehicle_id: Ulid,
        approved_date: DateTime<Utc>,
        notes: Option<String>,
    },
    BookingRejected {
        id: Ulid,
        vehicle_id: Ulid,
        notes: Option<String>,
    },
    BookingStarted {
        id: Ulid,
        vehicle_id: Ulid,
    },
    BookingCompleted {
        id: Ulid,
        vehicle_id: Ulid,
    },
    BookingCancelled {
        id: Ulid,
        vehicle_id: Ulid,
        notes: Option<String>,
    },
    BookingDeleted {
        id: Ulid,
        vehicle_id: Ulid,
    },
    StockRequested {
        id: Ulid,
        vehicle_id: Ulid,
        branch: Party,
        requested: u32,
        request_date: DateTime<Utc>,
    },
    StockGranted {
        id: Ulid,
        vehicle_id: Ulid,
        approved: u32,
        approved_date: DateTime<Utc>,
        notes: Option<String>,
    },
    StockDenied {
        id: Ulid,
        vehicle_id: Ulid,
        /// Set when the denial came through the approval path with a zero
        /// grant; plain rejections leave it unset.
        approved_date: Option<DateTime<Utc>>,
        notes: Option<String>,
    },
    StockRequestDeleted {
        id: Ulid,
        vehicle_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleInfo {
    pub id: Ulid,
    pub name: String,
    pub spec: VehicleSpec,
    pub total_stock: u32,
    pub available: u32,
}

/// The per-vehicle ledger counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevels {
    pub total_stock: u32,
    pub available: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRecord {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub vehicle_name: String,
    pub customer: Party,
    pub branch: Party,
    pub range: DateRange,
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub booking_date: DateTime<Utc>,
    pub approved_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub vehicle_name: String,
    pub branch: Party,
    pub requested: u32,
    pub approved: u32,
    pub status: RequestStatus,
    pub request_date: DateTime<Utc>,
    pub approved_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Dashboard counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FleetStats {
    pub vehicles: u64,
    pub vehicles_with_availability: u64,
    pub total_stock: u64,
    pub total_available: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    All,
    Customer(Ulid),
    Branch(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFilter {
    All,
    Branch(Ulid),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn spec() -> VehicleSpec {
        VehicleSpec {
            vehicle_type: "SUV".into(),
            brand: "Toyota".into(),
            model: "RAV4".into(),
            year: 2022,
            price_per_day: Decimal::new(8950, 2),
            features: vec!["GPS".into()],
            fuel_type: "Hybrid".into(),
            transmission: "Automatic".into(),
            seating_capacity: 5,
            image_url: None,
        }
    }

    fn booking(id: Ulid, start: &str, end: &str, status: BookingStatus) -> Booking {
        Booking {
            id,
            customer: Party { id: Ulid::new(), name: "Ada".into() },
            branch: Party { id: Ulid::new(), name: "Downtown".into() },
            range: DateRange::new(d(start), d(end)),
            total_amount: Decimal::new(20000, 2),
            status,
            booking_date: Utc::now(),
            approved_date: None,
            notes: None,
        }
    }

    #[test]
    fn range_basics() {
        let r = DateRange::new(d("2024-06-01"), d("2024-06-05"));
        assert_eq!(r.days(), 5);
        assert!(r.contains_day(d("2024-06-01")));
        assert!(r.contains_day(d("2024-06-05"))); // inclusive
        assert!(!r.contains_day(d("2024-06-06")));
    }

    #[test]
    fn single_day_range() {
        let r = DateRange::new(d("2024-06-01"), d("2024-06-01"));
        assert_eq!(r.days(), 1);
        assert!(r.overlaps(&r));
    }

    #[test]
    fn range_overlap_shares_boundary_day() {
        // [06-01, 06-05] and [06-05, 06-10] share the 5th: overlapping.
        let a = DateRange::new(d("2024-06-01"), d("2024-06-05"));
        let b = DateRange::new(d("2024-06-05"), d("2024-06-10"));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));

        // [06-06, 06-10] starts the day after: disjoint.
        let c = DateRange::new(d("2024-06-06"), d("2024-06-10"));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn range_overlap_containment() {
        let outer = DateRange::new(d("2024-06-01"), d("2024-06-30"));
        let inner = DateRange::new(d("2024-06-10"), d("2024-06-12"));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn booking_transition_table() {
        use BookingAction::*;
        use BookingStatus::*;

        assert_eq!(Pending.next(Approve), Some(Approved));
        assert_eq!(Pending.next(Reject), Some(Rejected));
        assert_eq!(Approved.next(Start), Some(InProcess));
        assert_eq!(Approved.next(Cancel), Some(Cancelled));
        assert_eq!(InProcess.next(Complete), Some(Completed));
        assert_eq!(InProcess.next(Cancel), Some(Cancelled));

        // Nothing leads out of a terminal state.
        for terminal in [Rejected, Completed, Cancelled] {
            for action in [Approve, Reject, Start, Complete, Cancel] {
                assert_eq!(terminal.next(action), None, "{terminal:?} {action:?}");
            }
        }
        // And a few non-defined edges.
        assert_eq!(Pending.next(Start), None);
        assert_eq!(Pending.next(Cancel), None);
        assert_eq!(Approved.next(Approve), None);
        assert_eq!(InProcess.next(Reject), None);
    }

    #[test]
    fn status_predicates() {
        use BookingStatus::*;
        assert!(Pending.holds_inventory());
        assert!(Approved.holds_inventory());
        assert!(InProcess.holds_inventory());
        assert!(!Rejected.holds_inventory());
        assert!(!Completed.holds_inventory());
        assert!(!Cancelled.holds_inventory());

        assert!(!Pending.is_active());
        assert!(Approved.is_active());
        assert!(InProcess.is_active());
        assert!(!Cancelled.is_active());
    }

    #[test]
    fn grant_resolution() {
        assert_eq!(Grant::Full.resolve(10), 10);
        assert_eq!(Grant::Units(4).resolve(10), 4);
        assert_eq!(Grant::Units(0).resolve(10), 0);
        // Over-grants clamp to the requested quantity.
        assert_eq!(Grant::Units(25).resolve(10), 10);
    }

    #[test]
    fn booking_ordering() {
        let mut vs = VehicleState::new(Ulid::new(), "RAV4".into(), spec(), 3);
        vs.insert_booking(booking(Ulid::new(), "2024-06-20", "2024-06-25", BookingStatus::Pending));
        vs.insert_booking(booking(Ulid::new(), "2024-06-01", "2024-06-05", BookingStatus::Pending));
        vs.insert_booking(booking(Ulid::new(), "2024-06-10", "2024-06-12", BookingStatus::Pending));
        assert_eq!(vs.bookings[0].range.start, d("2024-06-01"));
        assert_eq!(vs.bookings[1].range.start, d("2024-06-10"));
        assert_eq!(vs.bookings[2].range.start, d("2024-06-20"));
    }

    #[test]
    fn overlapping_skips_disjoint() {
        let mut vs = VehicleState::new(Ulid::new(), "RAV4".into(), spec(), 3);
        vs.insert_booking(booking(Ulid::new(), "2024-05-01", "2024-05-03", BookingStatus::Approved));
        vs.insert_booking(booking(Ulid::new(), "2024-06-04", "2024-06-08", BookingStatus::Approved));
        vs.insert_booking(booking(Ulid::new(), "2024-07-01", "2024-07-02", BookingStatus::Approved));

        let query = DateRange::new(d("2024-06-01"), d("2024-06-05"));
        let hits: Vec<_> = vs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].range.start, d("2024-06-04"));
    }

    #[test]
    fn overlapping_includes_boundary_day() {
        let mut vs = VehicleState::new(Ulid::new(), "RAV4".into(), spec(), 1);
        vs.insert_booking(booking(Ulid::new(), "2024-06-01", "2024-06-05", BookingStatus::Approved));

        // Query starting exactly on the booking's last day still hits.
        let query = DateRange::new(d("2024-06-05"), d("2024-06-10"));
        assert_eq!(vs.overlapping(&query).count(), 1);

        // One day later: disjoint.
        let query = DateRange::new(d("2024-06-06"), d("2024-06-10"));
        assert_eq!(vs.overlapping(&query).count(), 0);
    }

    #[test]
    fn overlapping_empty_vehicle() {
        let vs = VehicleState::new(Ulid::new(), "RAV4".into(), spec(), 3);
        let query = DateRange::new(d("2024-06-01"), d("2024-06-30"));
        assert_eq!(vs.overlapping(&query).count(), 0);
    }

    #[test]
    fn remove_booking_preserves_order() {
        let mut vs = VehicleState::new(Ulid::new(), "RAV4".into(), spec(), 3);
        let ids: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        vs.insert_booking(booking(ids[0], "2024-06-01", "2024-06-02", BookingStatus::Pending));
        vs.insert_booking(booking(ids[1], "2024-06-10", "2024-06-11", BookingStatus::Pending));
        vs.insert_booking(booking(ids[2], "2024-06-20", "2024-06-21", BookingStatus::Pending));

        vs.remove_booking(ids[1]);
        assert_eq!(vs.bookings.len(), 2);
        assert_eq!(vs.bookings[0].id, ids[0]);
        assert_eq!(vs.bookings[1].id, ids[2]);

        assert!(vs.remove_booking(Ulid::new()).is_none());
    }

    #[test]
    fn new_vehicle_starts_fully_available() {
        let vs = VehicleState::new(Ulid::new(), "RAV4".into(), spec(), 7);
        assert_eq!(vs.total_stock, 7);
        assert_eq!(vs.available, 7);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: Ulid::new(),
            vehicle_id: Ulid::new(),
            customer: Party { id: Ulid::new(), name: "Ada".into() },
            branch: Party { id: Ulid::new(), name: "Airport".into() },
            range: DateRange::new(d("2024-06-01"), d("2024-06-05")),
            total_amount: Decimal::new(44750, 2),
            booking_date: Utc::now(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn stock_event_roundtrip() {
        let event = Event::StockGranted {
            id: Ulid::new(),
            vehicle_id: Ulid::new(),
            approved: 4,
            approved_date: Utc::now(),
            notes: Some("partial: budget cap".into()),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

//! Hard resource limits. Violations surface as `EngineError::LimitExceeded`.

/// Max vehicles a single tenant may onboard.
pub const MAX_VEHICLES_PER_TENANT: usize = 10_000;

/// Max length of a vehicle/customer/branch display name.
pub const MAX_NAME_LEN: usize = 100;

/// Max length of admin/branch-admin notes.
pub const MAX_NOTES_LEN: usize = 1_000;

/// Max feature tags per vehicle, and max length of a single tag.
pub const MAX_FEATURES: usize = 32;
pub const MAX_FEATURE_LEN: usize = 64;

/// Max bookings retained per vehicle (terminal bookings count until deleted).
pub const MAX_BOOKINGS_PER_VEHICLE: usize = 10_000;

/// Max stock requests retained per vehicle.
pub const MAX_REQUESTS_PER_VEHICLE: usize = 10_000;

/// Max units a single stock request may ask for.
pub const MAX_REQUEST_QUANTITY: u32 = 1_000;

/// Max fleet-wide stock for one vehicle model.
pub const MAX_TOTAL_STOCK: u32 = 1_000_000;

/// Booking dates must fall in this year window.
pub const MIN_BOOKING_YEAR: i32 = 2000;
pub const MAX_BOOKING_YEAR: i32 = 2100;

/// Longest single rental, in calendar days (inclusive range).
pub const MAX_RENTAL_DAYS: i64 = 365;

/// Model-year window for onboarded vehicles.
pub const MIN_MODEL_YEAR: i32 = 2000;
pub const MAX_MODEL_YEAR: i32 = 2100;

/// Minimum seating capacity accepted at onboarding.
pub const MIN_SEATING_CAPACITY: u32 = 2;

/// Tenant (database name) limits.
pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 64;

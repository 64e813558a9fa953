use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed input: non-positive quantity, start date after end date,
    /// negative amount, out-of-range field.
    InvalidArgument(&'static str),
    /// State machine precondition violated.
    InvalidTransition {
        current: &'static str,
        action: &'static str,
    },
    /// Ledger reservation failed: no unit of the vehicle is available.
    NoAvailability(Ulid),
    /// Approving would double-book the fleet on at least one day.
    Conflict(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code; the human-readable text is `Display`.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
            EngineError::InvalidArgument(_) => "INVALID_ARGUMENT",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::NoAvailability(_) => "NO_AVAILABILITY",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::WalError(_) => "WAL_ERROR",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::InvalidTransition { current, action } => {
                write!(f, "cannot {action} a {current} record")
            }
            EngineError::NoAvailability(id) => {
                write!(f, "no availability for vehicle: {id}")
            }
            EngineError::Conflict(id) => {
                write!(f, "date conflict: fleet for vehicle {id} is fully booked in that range")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

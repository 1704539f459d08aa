//! Shared constants for end-to-end tests

// ============================================================================
// Credentials
// ============================================================================

/// Static token granting the `admin` scope
pub const ADMIN_TOKEN: &str = "admin-secret-token";

pub const ADMIN_IDENTITY: &str = "root";

/// Static token with only the `read` scope
pub const USER_TOKEN: &str = "user-secret-token";

pub const USER_IDENTITY: &str = "alice";

// ============================================================================
// Timing
// ============================================================================

pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

pub const REQUEST_TIMEOUT_SECS: u64 = 10;

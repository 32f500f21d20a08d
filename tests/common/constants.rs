//! Shared constants for end-to-end tests
//!
//! When seeded test data changes (profiles, catalog songs), update only this file.

// ============================================================================
// Seeded Profiles
// ============================================================================

pub const ADMIN_EMAIL: &str = "admin@strummy.test";

pub const TEACHER_EMAIL: &str = "teacher@strummy.test";

/// A second teacher, used to check that lessons and conflicts stay private
pub const OTHER_TEACHER_EMAIL: &str = "other.teacher@strummy.test";

/// Student who has been taking lessons, status `active`
pub const STUDENT_EMAIL: &str = "student@strummy.test";

pub const STUDENT_NAME: &str = "Sam Student";

// ============================================================================
// Seeded Catalog
// ============================================================================

pub const WONDERWALL_TITLE: &str = "Wonderwall";
pub const WONDERWALL_AUTHOR: &str = "Oasis";

pub const HOTEL_CALIFORNIA_TITLE: &str = "Hotel California";
pub const HOTEL_CALIFORNIA_AUTHOR: &str = "Eagles";

// ============================================================================
// Engine Settings
// ============================================================================

pub const INACTIVITY_THRESHOLD_DAYS: i64 = 28;

/// Conflicts pending longer than this are auto-resolved
pub const AUTO_RESOLVE_AFTER_DAYS: i64 = 7;

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Maximum time to wait for a triggered job to finish (milliseconds)
pub const JOB_COMPLETION_TIMEOUT_MS: u64 = 5000;

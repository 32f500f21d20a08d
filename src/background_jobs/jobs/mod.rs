//! Concrete background jobs.

pub mod conflict_auto_resolve;
pub mod student_activity_sweep;

pub use conflict_auto_resolve::ConflictAutoResolveJob;
pub use student_activity_sweep::StudentActivitySweepJob;

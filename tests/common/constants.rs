//! Shared constants for end-to-end tests
//!
//! When seeded test data changes, update only this file.

// ============================================================================
// Seeded Workspace Data
// ============================================================================

/// Name of the seeded report template
pub const REPORT_TEMPLATE_NAME: &str = "team_summary";

/// Recipient used by report jobs in tests
pub const REPORT_RECIPIENT: &str = "leads@example.com";

/// Seeded tasks created during the last 7 days, by status
pub const RECENT_COMPLETED_TASKS: usize = 2;
pub const RECENT_IN_PROGRESS_TASKS: usize = 1;
pub const RECENT_TODO_TASKS: usize = 1;

/// Title of a completed task created during the last 7 days
pub const RECENT_COMPLETED_TITLE: &str = "Ship onboarding flow";

/// Title of a completed task created 20 days ago
pub const OLDER_COMPLETED_TITLE: &str = "Quarterly planning";

// ============================================================================
// Built-in Jobs
// ============================================================================

pub const WEEKLY_REPORT_JOB: &str = "weekly_report";
pub const MONTHLY_REPORT_JOB: &str = "monthly_report";
pub const TASK_LIFECYCLE_JOB: &str = "task_lifecycle";

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Maximum time to wait for a job run to finish (milliseconds)
pub const RUN_FINISH_TIMEOUT_MS: u64 = 5000;

//! Stable exit codes for mender CLI commands.

/// Command succeeded; for `run`, the workflow completed.
pub const OK: i32 = 0;
/// Invalid settings/config/snapshot, or a collaborator fault.
pub const INVALID: i32 = 1;
/// The workflow ended `failed` after exhausting corrections, or `check`/`verify`
/// found violations.
pub const FAILED: i32 = 2;
/// The workflow was cancelled.
pub const CANCELLED: i32 = 3;

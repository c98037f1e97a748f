//! Run-level progress accounting.
//!
//! Progress is a fraction in `[0, 1]`: ingestion ends at 0.2, planning at
//! 0.3, task execution fills the next 0.6 evenly per finished task, and
//! completion is exactly 1.0.

pub const INGESTED: f64 = 0.2;
pub const PLANNED: f64 = 0.3;
pub const EXECUTION_SHARE: f64 = 0.6;
pub const COMPLETE: f64 = 1.0;

/// Progress after `finished` of `total` tasks have reached a final status.
pub fn task_progress(finished: usize, total: usize) -> f64 {
    if total == 0 {
        return PLANNED;
    }
    let finished = finished.min(total);
    PLANNED + EXECUTION_SHARE * (finished as f64 / total as f64)
}

/// Never move progress backwards.
pub fn advance(current: f64, next: f64) -> f64 {
    current.max(next).clamp(0.0, COMPLETE)
}

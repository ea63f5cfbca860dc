//! Per-frame value types exchanged with the surrounding image pipeline.
//!
//! These are the crate's side of the `sync.params` / `sync.status` metadata
//! keys described in the external interfaces; the pipeline that reads and
//! writes the actual metadata store is out of scope for this crate.

/// `sync.params`: what the pipeline hands the control loop each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncParams {
    pub wall_clock_us: i64,
    pub sensor_timestamp_ns: u64,
    pub sequence: u64,
}

/// `sync.status`: what the control loop publishes back each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatus {
    pub frame_duration_offset_us: i64,
    pub sync_lag_us: i64,
    pub ready: bool,
}

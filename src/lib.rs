//! Multi-camera frame synchronization core.
//!
//! This crate implements the leader/follower timing protocol that aligns
//! frame capture across a leader camera and one or more followers on a
//! shared local network: a rolling linear-regression clock estimator, a
//! multicast beacon protocol, and the per-frame control loop that ties them
//! together.
//!
//! Typical use: construct a [`SyncConfig`], build a [`SyncController`] from
//! it, call [`SyncController::set_mode`] and [`SyncController::set_frame_duration`]
//! once the surrounding pipeline knows them, then call
//! [`SyncController::process`] once per captured frame.

pub mod beacon;
pub mod clock_model;
pub mod config;
pub mod control;
pub mod error;
pub mod error_tracker;
pub mod estimator;
pub mod math;
pub mod metadata;
pub mod transport;

pub use beacon::Beacon;
pub use clock_model::ClockModel;
pub use config::SyncConfig;
pub use control::{FollowerSubState, Mode, SyncController};
pub use error::{Result, SyncError};
pub use error_tracker::ErrorTracker;
pub use estimator::RollingEstimator;
pub use metadata::{SyncParams, SyncStatus};

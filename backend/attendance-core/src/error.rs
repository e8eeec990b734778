// src/error.rs
use thiserror::Error;

use crate::clockify_client::TimeTrackingError;
use crate::device_client::DeviceError;
use crate::notifier::NotificationError;
use crate::storage::StorageError;

/// Failure of one polling or report cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Time tracking error: {0}")]
    TimeTracking(#[from] TimeTrackingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),
}

/// Startup failures surfaced before any cycle runs.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

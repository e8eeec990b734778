// src/lib.rs
//! Attendance reconciliation: device punches and time-tracking timers folded
//! into one row per employee per day.

pub mod clock;
pub mod clockify_client;
pub mod config;
pub mod device_client;
pub mod error;
pub mod json_store;
pub mod ledger;
pub mod model;
pub mod notifier;
pub mod onsite_poller;
pub mod processed_cache;
pub mod remote_poller;
pub mod report;
pub mod report_export;
pub mod scheduler;
pub mod storage;
pub mod sync_cursor;
pub mod time_util;
pub mod timer_state;
pub mod work_time;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod report_tests;

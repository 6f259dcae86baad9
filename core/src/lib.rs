//! Step and hydration tracking core.
//!
//! Converts cumulative pedometer readings into per-day step records, keeps
//! a device-local cache and a shared per-user record tree consistent, and
//! derives weekly series, goal progress and points from them.

pub mod cache;
pub mod clock;
pub mod counter;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod memory;
pub mod models;
pub mod profile;
pub mod progress;
pub mod sensor;
pub mod service;
pub mod session;
pub mod store;
pub mod tree;
pub mod water;
pub mod weekly;

pub use error::{TrackerError, TrackerResult};

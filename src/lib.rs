//! Geofenced attendance punching with an offline-first punch log that
//! reconciles with a remote attendance server.

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod location;
pub mod runtime;
pub mod sync;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{PunchError, SyncError};
pub use runtime::{Runtime, RuntimeHandle, RuntimeOptions};

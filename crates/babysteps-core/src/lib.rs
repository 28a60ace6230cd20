//! babysteps-core library.
//!
//! Task/step storage for the BabySteps habit tracker: the versioned SQLite
//! schema and its migration stages, the integrity checker that restores the
//! data invariants at startup, and the read paths used by the widget and the
//! activity heatmap.

pub mod activity;
pub mod config;
pub mod db;
pub mod error;
pub mod integrity;
pub mod lock;
pub mod model;
pub mod progress;
pub mod startup;
pub mod time;

/// # Conventions
///
/// - **Errors**: `thiserror` enums per subsystem, each mapping to an
///   [`error::ErrorCode`]. `anyhow::Result` only for config loading.
/// - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
///   The library never installs a subscriber.
pub use db::{Confirmation, StoreError, open_store};
pub use integrity::IntegrityReport;
pub use progress::ProgressEntry;
pub use startup::{StartupReport, startup};

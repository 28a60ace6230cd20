pub mod activity;
pub mod check;
pub mod migrate;
pub mod progress;
pub mod reset;
pub mod status;

use babysteps_core::config::StoreConfig;
use babysteps_core::db;
use babysteps_core::lock::StoreReadLock;
use rusqlite::Connection;

/// Shared lock plus a read-only connection. Nothing is migrated.
pub fn open_for_reading(
    config: &StoreConfig,
) -> anyhow::Result<(StoreReadLock, Connection)> {
    let conn = db::open_read_only(&config.store_path)?;
    let lock = StoreReadLock::acquire(&config.store_path, config.lock_timeout())?;
    Ok((lock, conn))
}

//! `bs reset`: set an unusable store aside and start empty.
//!
//! The old files are renamed, not deleted. Without `--yes` nothing happens.

use std::io::Write;
use std::path::PathBuf;

use babysteps_core::config::StoreConfig;
use babysteps_core::db::{self, Confirmation};
use babysteps_core::lock::StoreLock;
use babysteps_core::time;
use clap::Args;
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Arguments for `bs reset`.
#[derive(Args, Debug, Default)]
pub struct ResetArgs {
    /// Confirm that every task and step in the store should be discarded.
    #[arg(long)]
    pub yes: bool,
}

#[derive(Debug, Serialize)]
struct ResetOutput {
    store_path: PathBuf,
    quarantined: Vec<PathBuf>,
}

/// Execute `bs reset`.
pub fn run_reset(args: &ResetArgs, config: &StoreConfig, output: OutputMode) -> anyhow::Result<()> {
    let confirmation = if args.yes {
        Confirmation::DiscardAllData
    } else {
        Confirmation::Declined
    };

    let _lock = StoreLock::acquire(&config.store_path, config.lock_timeout())?;
    let quarantined = db::discard_and_recreate(&config.store_path, confirmation, time::now())?;
    let payload = ResetOutput {
        store_path: config.store_path.clone(),
        quarantined,
    };

    render_mode(
        output,
        &payload,
        |payload, w| {
            for path in &payload.quarantined {
                writeln!(w, "quarantined={}", path.display())?;
            }
            writeln!(w, "store={}", payload.store_path.display())
        },
        |payload, w| {
            pretty_section(w, "Store reset")?;
            pretty_kv(w, "New store", payload.store_path.display().to_string())?;
            if payload.quarantined.is_empty() {
                pretty_kv(w, "Previous data", "none found")?;
            }
            for path in &payload.quarantined {
                pretty_kv(w, "Set aside", path.display().to_string())?;
            }
            Ok(())
        },
    )
}

#![forbid(unsafe_code)]

mod cmd;
mod output;

use babysteps_core::config;
use babysteps_core::db::StoreError;
use babysteps_core::db::migrations::MigrationError;
use babysteps_core::error::ErrorCode;
use babysteps_core::lock::LockError;
use babysteps_core::startup::StartupError;
use clap::{Parser, Subcommand};
use output::{CliError, OutputMode};
use std::env;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "bs: maintenance tool for the BabySteps task store",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Store file to operate on (overrides BABYSTEPS_STORE and the config file).
    #[arg(long, global = true, value_name = "PATH")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Read",
        about = "Show store location, schema version and counts",
        long_about = "Inspect the store without migrating or repairing it.",
        after_help = "EXAMPLES:\n    # Where is the store and is it current?\n    bs status\n\n    # Emit machine-readable output\n    bs status --json"
    )]
    Status(cmd::status::StatusArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Run the app-start sequence",
        long_about = "Relocate a legacy store, migrate to the latest schema and run the configured integrity pass.",
        after_help = "EXAMPLES:\n    # Bring the store up to date\n    bs migrate\n\n    # Operate on a specific file\n    bs migrate --store ./babysteps.sqlite3"
    )]
    Migrate(cmd::migrate::MigrateArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Check and repair data integrity",
        long_about = "Run the comprehensive integrity pass, saving any repairs in one transaction.",
        after_help = "EXAMPLES:\n    # Check and repair\n    bs check\n\n    # Read-only completion-flag check\n    bs check --quick"
    )]
    Check(cmd::check::CheckArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show widget progress counts",
        long_about = "Show the counts the home-screen widget displays for a day.",
        after_help = "EXAMPLES:\n    # Today\n    bs progress\n\n    # A specific day\n    bs progress --date 2026-03-14"
    )]
    Progress(cmd::progress::ProgressArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show completed steps per day",
        long_about = "Show per-day completion counts and activity levels behind the calendar heatmap.",
        after_help = "EXAMPLES:\n    # The configured window (90 days by default)\n    bs activity\n\n    # The last two weeks\n    bs activity --days 14"
    )]
    Activity(cmd::activity::ActivityArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Discard the store and start empty",
        long_about = "Rename the store and its sidecar files aside and create an empty store in its place.",
        after_help = "EXAMPLES:\n    # Required: explicit confirmation\n    bs reset --yes"
    )]
    Reset(cmd::reset::ResetArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("BABYSTEPS_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "babysteps=debug,info"
        } else {
            "babysteps=info,warn"
        })
    });

    let format = env::var("BABYSTEPS_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Map a command failure to its stable code and hint.
fn describe(error: &anyhow::Error) -> CliError {
    let code = error.chain().find_map(|cause| {
        if let Some(error) = cause.downcast_ref::<StartupError>() {
            Some(error.code())
        } else if let Some(error) = cause.downcast_ref::<StoreError>() {
            Some(error.code())
        } else if let Some(error) = cause.downcast_ref::<LockError>() {
            Some(error.code())
        } else {
            cause.downcast_ref::<MigrationError>().map(MigrationError::code)
        }
    });
    CliError::coded(code.unwrap_or(ErrorCode::InternalUnexpected), format!("{error:#}"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let effective = match config::resolve_config(cli.store.clone(), cli.json) {
        Ok(effective) => effective,
        Err(error) => {
            let mode = if cli.json { OutputMode::Json } else { OutputMode::Text };
            output::render_error(
                mode,
                &CliError::coded(ErrorCode::ConfigParseError, format!("{error:#}")),
            )?;
            std::process::exit(2);
        }
    };
    let store = &effective.store;
    let output = effective.output;
    debug!(store = %store.store_path.display(), ?output, "resolved configuration");

    let command_result = match &cli.command {
        Commands::Status(args) => cmd::status::run_status(args, store, output),
        Commands::Migrate(args) => cmd::migrate::run_migrate(args, store, output),
        Commands::Check(args) => cmd::check::run_check(args, store, output),
        Commands::Progress(args) => cmd::progress::run_progress(args, store, output),
        Commands::Activity(args) => cmd::activity::run_activity(args, store, output),
        Commands::Reset(args) => cmd::reset::run_reset(args, store, output),
    };

    if let Err(error) = command_result {
        output::render_error(output, &describe(&error))?;
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use babysteps_core::db::Confirmation;
    use std::path::Path;

    #[test]
    fn json_flag_parses_after_subcommand() {
        let cli = Cli::parse_from(["bs", "status", "--json"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Status(_)));
    }

    #[test]
    fn store_flag_is_global() {
        let cli = Cli::parse_from(["bs", "check", "--store", "/tmp/x.sqlite3", "--quick"]);
        assert_eq!(cli.store.as_deref(), Some(Path::new("/tmp/x.sqlite3")));
        assert!(matches!(
            cli.command,
            Commands::Check(cmd::check::CheckArgs { quick: true })
        ));
    }

    #[test]
    fn progress_date_must_be_a_calendar_date() {
        assert!(Cli::try_parse_from(["bs", "progress", "--date", "2026-03-14"]).is_ok());
        assert!(Cli::try_parse_from(["bs", "progress", "--date", "tomorrow"]).is_err());
    }

    #[test]
    fn reset_defaults_to_unconfirmed() {
        let cli = Cli::parse_from(["bs", "reset"]);
        assert!(matches!(
            cli.command,
            Commands::Reset(cmd::reset::ResetArgs { yes: false })
        ));
    }

    #[test]
    fn all_subcommands_parse() {
        let subcommands = [
            vec!["bs", "status"],
            vec!["bs", "migrate"],
            vec!["bs", "check"],
            vec!["bs", "progress"],
            vec!["bs", "activity", "--days", "14"],
            vec!["bs", "reset", "--yes"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(result.is_ok(), "failed to parse {args:?}: {:?}", result.err());
        }
    }

    #[test]
    fn describe_finds_core_error_codes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("missing.sqlite3");
        let error = babysteps_core::db::discard_and_recreate(
            &path,
            Confirmation::Declined,
            babysteps_core::time::now(),
        )
        .expect_err("declined");

        let described = describe(&anyhow::Error::from(error).context("reset failed"));

        assert_eq!(described.error_code.as_deref(), Some("E5003"));
        assert!(described.message.starts_with("reset failed"));
    }

    #[test]
    fn describe_defaults_to_internal() {
        let described = describe(&anyhow::anyhow!("boom"));
        assert_eq!(described.error_code.as_deref(), Some("E9001"));
    }
}

//! # TabVault CLI (`tabvault`)
//!
//! ## Usage
//!
//! ```bash
//! tabvault --config ./config/tabvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tabvault backup` | Process every URL not yet completed (default) |
//! | `tabvault sync` | Process only URLs the manifest has never seen |
//! | `tabvault retry` | Process only failed URLs |
//! | `tabvault status` | Show completed/failed/pending counts |
//! | `tabvault verify [--fix]` | Check files against the manifest |
//! | `tabvault rebuild-manifest [--yes]` | Recreate the manifest from files on disk |
//! | `tabvault find-orphans` | List files the manifest does not track |
//! | `tabvault rehash` | Add hashes to completed entries that lack them |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use tabvault::backup::{self, BackupMode};
use tabvault::progress::ProgressMode;
use tabvault::{config, logging, recovery, status, verify};

/// TabVault: crash-safe, resumable guitar tab backup.
///
/// Settings are read from `--config`, else `./config/tabvault.toml` when it
/// exists, else built-in defaults.
#[derive(Parser)]
#[command(
    name = "tabvault",
    about = "TabVault: crash-safe, resumable guitar tab backup",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level and list every verification issue.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Progress output on stderr: off, human, or json.
    ///
    /// Defaults to human when stderr is a terminal, off otherwise.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Back up every tab not yet completed.
    Backup,

    /// Back up only tabs the manifest has never seen.
    Sync,

    /// Retry only tabs that previously failed.
    Retry,

    /// Show backup progress.
    Status,

    /// Verify backed-up files against the manifest.
    ///
    /// Files are never modified. With `--fix`, damaged entries are marked
    /// for redownload so the next `retry` picks them up.
    Verify {
        #[arg(long)]
        fix: bool,
    },

    /// Recreate the manifest from tab files on disk.
    RebuildManifest {
        /// Overwrite an existing manifest without asking.
        #[arg(long, short)]
        yes: bool,
    },

    /// List tab files that the manifest does not track.
    FindOrphans,

    /// Compute hashes for completed entries that lack them.
    Rehash,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let progress = ProgressMode::parse(cli.progress.as_deref()).map_err(anyhow::Error::msg)?;
    let cfg = config::resolve_config(cli.config.as_deref())?;
    let log_file = logging::init(&cfg.paths.log_dir, cli.verbose)?;
    info!(log_file = %log_file.display(), "TabVault starting");

    match cli.command.unwrap_or(Commands::Backup) {
        Commands::Backup => backup::run_backup(&cfg, BackupMode::Backup, progress).await?,
        Commands::Sync => backup::run_backup(&cfg, BackupMode::Sync, progress).await?,
        Commands::Retry => backup::run_backup(&cfg, BackupMode::Retry, progress).await?,
        Commands::Status => status::run_status(&cfg)?,
        Commands::Verify { fix } => verify::run_verify(&cfg, fix, cli.verbose, progress)?,
        Commands::RebuildManifest { yes } => recovery::run_rebuild_manifest(&cfg, yes)?,
        Commands::FindOrphans => recovery::run_find_orphans(&cfg)?,
        Commands::Rehash => recovery::run_rehash(&cfg)?,
    }

    Ok(())
}

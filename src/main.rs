//! # hashedbackup
//!
//! A content-addressed file backup engine. Each backup run walks a source
//! tree, hashes every file (MD5, cached via an extended attribute so
//! unmodified files are not re-read), stores new content once under
//! `objects/<hh>/<hash>`, and records the run as a bzip2-compressed
//! JSON-lines manifest. Deduplication is automatic and cross-snapshot:
//! identical content anywhere in the repository is stored only once.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!                 │  CLI (clap)  │
//!                 └──────┬───────┘
//!                        │
//!          ┌─────────────┼─────────────┐
//!          ▼             ▼             ▼
//!     ┌─────────┐  ┌───────────┐  ┌──────────┐
//!     │  init   │  │  snapshot │  │ profile  │
//!     └─────────┘  └─────┬─────┘  └────┬─────┘
//!                        │             │
//!              ┌─────────┴───────┐     │
//!              ▼                 ▼     │
//!        ┌──────────┐      ┌──────────┐│
//!        │ fileinfo │      │ manifest ││
//!        │ (+ xattr │      │ (bzip2   ││
//!        │  cache)  │      │  jsonl)  ││
//!        └────┬─────┘      └────┬─────┘│
//!             │                 │      │
//!             ▼                 ▼      ▼
//!         ┌────────┐      ┌──────────────┐
//!         │hashing │      │   backend    │
//!         │ (MD5)  │      │ local / sftp │
//!         └────────┘      └──────────────┘
//! ```

mod backend;
mod error;
mod fileinfo;
mod hashing;
mod init;
mod layout;
mod manifest;
mod presentation;
mod profile;
mod snapshot;

use clap::{Parser, Subcommand};
use colored::Colorize;
use error::Result;
use std::path::PathBuf;

/// hashedbackup — a content-addressed, deduplicating file backup engine
#[derive(Parser, Debug)]
#[command(name = "hashedbackup", version, about = "A content-addressed file backup engine with deduplication over local and SSH repositories")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug-level diagnostics
    #[arg(long, global = true)]
    debug: bool,

    /// Show a progress indicator while walking the source tree
    #[arg(long, global = true)]
    progress: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log each newly uploaded object
    #[arg(short = 'u', long = "uploaded", global = true)]
    uploaded: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new, empty repository
    Init {
        /// Repository destination: a local path or `[user@]host:path`
        dst: String,
    },

    /// Back up a source directory into a repository namespace
    Backup {
        /// Directory to back up
        src: PathBuf,

        /// Repository destination: a local path or `[user@]host:path`
        dst: String,

        /// Namespace this snapshot belongs to
        #[arg(short = 'n', long)]
        namespace: String,

        /// Store objects as symlinks to the source instead of copying
        /// (local backend only; not suitable for a real backup).
        #[arg(long, conflicts_with = "hardlink")]
        symlink: bool,

        /// Store objects as hardlinks to the source instead of copying
        /// (local backend only; not suitable for a real backup).
        #[arg(long, conflicts_with = "symlink")]
        hardlink: bool,

        /// Skip this backup if the namespace's newest manifest is younger
        /// than this duration (e.g. `12h`, `2d`, `30m`).
        #[arg(long, value_parser = parse_duration)]
        if_older_than: Option<chrono::Duration>,
    },

    /// List manifests recorded in a repository
    ListManifests {
        /// Repository destination: a local path or `[user@]host:path`
        dst: String,

        /// Restrict the listing to this namespace
        #[arg(short = 'n', long)]
        namespace: Option<String>,
    },

    /// Run a backup described by a profile in `~/.hashedbackup/profiles`
    BackupProfile {
        /// Profile name (defaults to the `default` section)
        name: Option<String>,

        /// Print the age of the namespace's newest manifest instead of
        /// running a backup.
        #[arg(long)]
        age: bool,
    },
}

/// Parses a duration suffixed with `s`/`m`/`h`/`d` (e.g. `30m`, `12h`).
fn parse_duration(s: &str) -> std::result::Result<chrono::Duration, String> {
    let (digits, suffix) = s.split_at(s.len() - 1);
    let amount: i64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{s}': expected a number followed by s/m/h/d"))?;
    match suffix {
        "s" => Ok(chrono::Duration::seconds(amount)),
        "m" => Ok(chrono::Duration::minutes(amount)),
        "h" => Ok(chrono::Duration::hours(amount)),
        "d" => Ok(chrono::Duration::days(amount)),
        _ => Err(format!(
            "invalid duration '{s}': expected a number followed by s/m/h/d"
        )),
    }
}

fn main() {
    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(&cli) {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Init { dst } => cmd_init(dst),
        Command::Backup {
            src,
            dst,
            namespace,
            symlink,
            hardlink,
            if_older_than,
        } => cmd_backup(
            cli,
            src,
            dst,
            namespace,
            *symlink,
            *hardlink,
            *if_older_than,
        ),
        Command::ListManifests { dst, namespace } => cmd_list_manifests(dst, namespace.as_deref()),
        Command::BackupProfile { name, age } => cmd_backup_profile(cli, name.as_deref(), *age),
    }
}

fn cmd_init(dst: &str) -> Result<()> {
    init::init(dst)?;
    eprintln!("{} Initialized repository at {dst}", "✓".green());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_backup(
    cli: &Cli,
    src: &std::path::Path,
    dst: &str,
    namespace: &str,
    symlink: bool,
    hardlink: bool,
    if_older_than: Option<chrono::Duration>,
) -> Result<()> {
    let store_mode = snapshot::resolve_store_mode(symlink, hardlink)?;

    if cli.verbose {
        presentation::print_header(&format!("backup {} → {dst} [{namespace}]", src.display()));
    }

    let progress_bar = cli.progress.then(presentation::new_progress_bar);
    let config = snapshot::SnapshotConfig {
        source_root: src,
        destination: dst,
        namespace,
        store_mode,
        if_older_than,
        log_uploaded: cli.uploaded,
        progress: progress_bar.as_ref(),
    };

    match snapshot::run(&config)? {
        snapshot::RunResult::Completed(outcome) => presentation::print_snapshot_summary(namespace, &outcome),
        snapshot::RunResult::Skipped => presentation::print_skipped(namespace),
    }
    Ok(())
}

fn cmd_list_manifests(dst: &str, namespace: Option<&str>) -> Result<()> {
    let backend = backend::open(dst)?;
    backend.check_valid()?;
    let manifests = manifest::list_manifests(backend.as_ref(), namespace)?;
    presentation::print_manifest_table(&manifests, chrono::Utc::now());
    Ok(())
}

fn cmd_backup_profile(cli: &Cli, name: Option<&str>, age_only: bool) -> Result<()> {
    let profile = profile::load(name)?;

    if age_only {
        let backend = backend::open(&profile.dst)?;
        backend.check_valid()?;
        match manifest::newest_manifest_age(backend.as_ref(), &profile.namespace, chrono::Utc::now())? {
            Some(age) => eprintln!(
                "  namespace '{}': newest manifest is {} old",
                profile.namespace,
                humanize_duration(age),
            ),
            None => eprintln!("  namespace '{}': no manifests yet", profile.namespace),
        }
        return Ok(());
    }

    if cli.verbose {
        presentation::print_header(&format!("backup-profile {}", name.unwrap_or("default")));
    }

    let progress_bar = cli.progress.then(presentation::new_progress_bar);
    let config = snapshot::SnapshotConfig {
        source_root: &profile.src,
        destination: &profile.dst,
        namespace: &profile.namespace,
        store_mode: profile.store_mode,
        if_older_than: None,
        log_uploaded: cli.uploaded,
        progress: progress_bar.as_ref(),
    };

    match snapshot::run(&config)? {
        snapshot::RunResult::Completed(outcome) => {
            presentation::print_snapshot_summary(&profile.namespace, &outcome)
        }
        snapshot::RunResult::Skipped => presentation::print_skipped(&profile.namespace),
    }
    Ok(())
}

fn humanize_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3_600),
        s => format!("{}d", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_backup_subcommand() {
        let cli = Cli::parse_from([
            "hashedbackup",
            "backup",
            "/home/alice/pictures",
            "backuphost:/srv/backups",
            "-n",
            "pictures",
            "--if-older-than",
            "12h",
        ]);
        match cli.command {
            Command::Backup {
                namespace,
                if_older_than,
                ..
            } => {
                assert_eq!(namespace, "pictures");
                assert_eq!(if_older_than, Some(chrono::Duration::hours(12)));
            }
            _ => panic!("expected Backup"),
        }
    }

    #[test]
    fn rejects_symlink_and_hardlink_together() {
        let result = Cli::try_parse_from([
            "hashedbackup",
            "backup",
            "/src",
            "/dst",
            "-n",
            "ns",
            "--symlink",
            "--hardlink",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_duration_accepts_known_suffixes() {
        assert_eq!(parse_duration("30m").unwrap(), chrono::Duration::minutes(30));
        assert_eq!(parse_duration("2d").unwrap(), chrono::Duration::days(2));
        assert!(parse_duration("garbage").is_err());
    }
}

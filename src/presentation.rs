//! # Presentation
//!
//! Colored status lines and progress reporting. `--no-color` is applied
//! once at startup via `colored::control::set_override`, so every call
//! site below can use `colored::Colorize` unconditionally.
//!
//! The backup progress bar is a spinner rather than a bounded bar: the
//! snapshot engine streams the walk and never knows the total file count
//! up front, unlike the teacher crate's target-count-sized bar.

use crate::manifest::ManifestSummary;
use crate::snapshot::SnapshotOutcome;
use chrono::{DateTime, Utc};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PiB")
}

fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3_600),
        s => format!("{}d", s / 86_400),
    }
}

pub fn new_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.green} {pos} files  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb
}

pub fn print_header(action: &str) {
    eprintln!();
    eprintln!(
        "  {} hashedbackup v{} — {action}",
        "⚡".bold(),
        env!("CARGO_PKG_VERSION"),
    );
    eprintln!();
}

pub fn print_snapshot_summary(namespace: &str, outcome: &SnapshotOutcome) {
    eprintln!();
    eprintln!(
        "  {} Snapshot: {} → {}",
        "✓".green(),
        namespace.bold(),
        outcome.manifest_path,
    );
    eprintln!(
        "    Files:    {} cached, {} hashed",
        outcome.n_cached, outcome.n_updated,
    );
    eprintln!(
        "    Objects:  {} new, {} already present",
        outcome.n_objects_added, outcome.n_objects_exist,
    );
    eprintln!(
        "    Size:     {} total, {} uploaded",
        format_size(outcome.total_bytes),
        format_size(outcome.uploaded_bytes),
    );
    eprintln!("    Duration: {:.2}s", outcome.duration.as_secs_f64());
}

pub fn print_skipped(namespace: &str) {
    eprintln!(
        "  {} Skipped '{namespace}': last manifest is younger than --if-older-than",
        "•".dimmed(),
    );
}

pub fn print_manifest_table(manifests: &[ManifestSummary], now: DateTime<Utc>) {
    if manifests.is_empty() {
        eprintln!("No manifests found.");
        return;
    }

    eprintln!(
        "{:<30}  {:<20}  {:>6}",
        "NAMESPACE", "TIMESTAMP (UTC)", "AGE"
    );
    eprintln!("{}", "─".repeat(60));
    for m in manifests {
        eprintln!(
            "{:<30}  {:<20}  {:>6}",
            m.namespace,
            m.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format_age(now - m.timestamp),
        );
    }
    eprintln!();
    eprintln!("  {} manifest(s)", manifests.len());
}

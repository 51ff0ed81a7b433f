//! Small helpers shared across the routing and fixture passes.

use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::{LazyLock, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use serde::Serialize;
use tracing::warn;

static NON_SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

static WARNED: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Human readable size the way archive reports show it: MB below half a GB, GB above.
pub fn human_size(bytes: u64) -> String {
    let gb = bytes as f64 / 1000.0 / 1000.0 / 1000.0;
    if gb < 0.5 {
        format!("{:.1}MB", bytes as f64 / 1000.0 / 1000.0)
    } else {
        format!("{:.1}GB", gb)
    }
}

/// Timestamp string used for `created_at` / `updated_at`.
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string()
}

/// Emit a warning once per `key` for the lifetime of the process.
/// Returns whether this call emitted it.
pub fn warn_once(key: &str, msg: &str) -> bool {
    let first = WARNED
        .lock()
        .map(|mut seen| seen.insert(key.to_string()))
        .unwrap_or(true);
    if first {
        warn!("{}", msg);
    }
    first
}

/// Lower-case, hyphen-separated form of `s`.
pub fn slugify(s: &str) -> String {
    let lower = s.to_lowercase();
    NON_SLUG_RE
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

/// Ask a yes/no question on stdin. Anything but `y` is a no.
pub fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Bar over `len` steps, labelled with `msg`.
pub fn progress_bar(len: u64, msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    pb.set_message(msg.to_string());
    Ok(pb)
}

pub fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use tracing::debug;

pub const DEFAULT_LABEL_PROBE_LIMIT: u32 = 100;

fn exists(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("cannot stat {}", path.display())),
    }
}

/// Highest `N` among entries named `<base>-N` in `systems_dir`.
fn max_used_suffix(systems_dir: &Path, base: &str) -> Result<Option<u32>> {
    let prefix = format!("{base}-");
    let mut max = None;
    for entry in fs::read_dir(systems_dir)
        .with_context(|| format!("cannot list {}", systems_dir.display()))?
    {
        let entry = entry.with_context(|| format!("cannot list {}", systems_dir.display()))?;
        let name = entry.file_name();
        let Some(suffix) = name.to_str().and_then(|name| name.strip_prefix(&prefix)) else {
            continue;
        };
        if suffix.is_empty() || !suffix.chars().all(|ch| ch.is_ascii_digit()) {
            continue;
        }
        let Ok(number) = suffix.parse::<u32>() else {
            continue;
        };
        max = Some(max.map_or(number, |current: u32| current.max(number)));
    }
    Ok(max)
}

/// Picks an unused recovery system label for `today`.
///
/// The plain `YYYYMMDD` label is used when free. Otherwise the label takes
/// the first free `-N` suffix above the highest one already present, trying
/// at most `probe_limit` candidates.
pub fn pick_recovery_system_label(
    systems_dir: &Path,
    today: NaiveDate,
    probe_limit: u32,
) -> Result<String> {
    let base = today.format("%Y%m%d").to_string();
    if !exists(&systems_dir.join(&base))? {
        debug!(label = %base, "recovery system label is free");
        return Ok(base);
    }

    let mut next = match max_used_suffix(systems_dir, &base)? {
        Some(max) => max
            .checked_add(1)
            .ok_or_else(|| anyhow!("recovery system label suffix overflow for {base}"))?,
        None => 0,
    };
    for _ in 0..probe_limit {
        let candidate = format!("{base}-{next}");
        if !exists(&systems_dir.join(&candidate))? {
            debug!(label = %candidate, "picked suffixed recovery system label");
            return Ok(candidate);
        }
        next = next
            .checked_add(1)
            .ok_or_else(|| anyhow!("recovery system label suffix overflow for {base}"))?;
    }

    Err(anyhow!(
        "cannot find unused recovery system label for {base} after {probe_limit} attempts"
    ))
}

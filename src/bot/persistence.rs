// src/bot/persistence.rs - List fragments on disk and session logs at shutdown

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::bot::list_store::FilterPattern;
use crate::bot::state::SessionSnapshot;

/// Read every regular file under `dir`, recursively, and return their
/// trimmed non-blank lines. A missing directory yields an empty list.
/// Directories and fragments that cannot be read are logged and skipped.
pub async fn load_list_dir(dir: &Path) -> Vec<String> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        warn!("List directory {} does not exist, starting with an empty list", dir.display());
        return Vec::new();
    }

    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        if let Err(e) = collect_entries(&current, &mut files, &mut pending).await {
            warn!("Skipping part of list directory {}: {:#}", current.display(), e);
        }
    }
    files.sort();

    let mut lines = Vec::new();
    let mut loaded = 0usize;
    for file in &files {
        let content = match tokio::fs::read_to_string(file).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping unreadable list file {}: {}", file.display(), e);
                continue;
            }
        };
        lines.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
        loaded += 1;
        debug!("Loaded list fragment {}", file.display());
    }

    info!("Loaded {} entries from {} files in {}", lines.len(), loaded, dir.display());
    lines
}

async fn collect_entries(
    dir: &Path,
    files: &mut Vec<PathBuf>,
    pending: &mut Vec<PathBuf>,
) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        if file_type.is_dir() {
            pending.push(entry.path());
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}

/// Compile startup filters, dropping the ones that are not valid patterns
pub fn compile_filters(patterns: Vec<String>) -> Vec<FilterPattern> {
    patterns
        .into_iter()
        .filter_map(|raw| match FilterPattern::compile(&raw) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("Skipping filter from disk: {}", e);
                None
            }
        })
        .collect()
}

/// File name suffix for session logs, e.g. `05Mar24-211530UTC`
pub fn session_stamp(at: DateTime<Utc>) -> String {
    format!("{}UTC", at.format("%d%b%y-%H%M%S"))
}

/// Write `banlog-<stamp>` and `newfilters-<stamp>` for a non-empty session.
/// Empty logs produce no file.
pub async fn write_session_logs(
    dir: &Path,
    snapshot: &SessionSnapshot,
    at: DateTime<Utc>,
) -> Result<Vec<PathBuf>> {
    let stamp = session_stamp(at);
    let logs = [
        ("banlog", &snapshot.banned_names),
        ("newfilters", &snapshot.new_filters),
    ];

    let mut written = Vec::new();
    for (kind, entries) in logs {
        if entries.is_empty() {
            continue;
        }

        if written.is_empty() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        }

        let path = dir.join(format!("{}-{}", kind, stamp));
        tokio::fs::write(&path, entries.join("\n"))
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written.push(path);
    }

    Ok(written)
}

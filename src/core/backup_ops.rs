//! Backup session management operations
//!
//! Listing, showing, restoring, and cleaning up backup sessions, plus the
//! retention pass that runs after every sync.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use similar::TextDiff;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::backup::{
    BackupManager, SessionManifest, list_sessions, read_session_manifest, rewrite_index,
    session_is_complete, session_path, stream_blake3,
};
use crate::infra::io::{read_to_string_or_empty, resolve_write_target, write_atomic};

/// Session ID resolution result
#[derive(Debug)]
pub enum SessionIdResolution {
    /// Single session found
    Single(String),
    /// Multiple matches found
    Multiple(Vec<String>),
    /// No matches found
    NotFound,
}

/// Concise session info for listing
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub timestamp: String,
    pub operation: String,
    pub success: bool,
    pub files: usize,
    pub sample_paths: Vec<String>,
}

/// Request structure for listing sessions
#[derive(Debug)]
pub struct ListRequest {
    pub successful: bool,
    pub operation: Option<String>,
    pub since: Option<String>,
    pub limit: usize,
    pub sort_desc: bool,
}

/// Request structure for showing session details
#[derive(Debug)]
pub struct ShowRequest {
    pub id: String,
    pub verbose: bool,
}

/// Response for show command
#[derive(Debug, Serialize)]
pub struct ShowResponse {
    pub manifest: SessionManifest,
    pub session_path: PathBuf,
    pub total_size: Option<u64>,
}

/// Request structure for restore operations
#[derive(Debug)]
pub struct RestoreRequest {
    pub session_id: String,
    pub dry_run: bool,
    pub show_diff: bool,
    pub force: bool,
    pub verify_checksum: bool,
    pub backup_current: bool,
}

/// Unified diff between the current file and its backed-up copy
#[derive(Debug, Clone, Serialize)]
pub struct FileDiff {
    pub path: PathBuf,
    pub unified: String,
}

/// Result of restore operation
#[derive(Debug, Serialize)]
pub struct RestoreResult {
    pub session_id: String,
    pub restored: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub conflicts: Vec<PathBuf>,
    pub diffs: Option<Vec<FileDiff>>,
    pub backed_up_current: bool,
    pub backup_session_id: Option<String>,
}

/// Request structure for cleanup operations
#[derive(Debug)]
pub struct CleanupRequest {
    pub older_than: Option<String>,
    pub keep_latest: Option<usize>,
    pub dry_run: bool,
    pub include_incomplete: bool,
}

/// Result of cleanup operation
#[derive(Debug, Serialize)]
pub struct CleanupResult {
    pub sessions_removed: Vec<String>,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

/// List sessions with filters, minimizing manifest IO
pub fn list_sessions_filtered(backup_dir: &Path, req: ListRequest) -> Result<Vec<SessionInfo>> {
    let since_time = req.since.as_deref().map(parse_relative_time).transpose()?;

    let mut entries = list_sessions(backup_dir)?;

    // Keep only completed sessions
    entries.retain(|e| session_is_complete(backup_dir, &e.id));

    if req.successful {
        entries.retain(|e| e.success);
    }

    if let Some(ref op) = req.operation {
        let target = op.to_ascii_lowercase();
        entries.retain(|e| e.operation.to_ascii_lowercase() == target);
    }

    if let Some(since) = since_time {
        entries.retain(|e| parse_ts(&e.timestamp).map(|dt| dt >= since).unwrap_or(false));
    }

    // Sort by parsed timestamp, falling back to the raw string
    entries.sort_by(|a, b| {
        let (ap, bp) = (parse_ts(&a.timestamp), parse_ts(&b.timestamp));
        if req.sort_desc {
            bp.cmp(&ap).then_with(|| b.timestamp.cmp(&a.timestamp))
        } else {
            ap.cmp(&bp).then_with(|| a.timestamp.cmp(&b.timestamp))
        }
    });

    entries.truncate(req.limit);

    let mut out = Vec::with_capacity(entries.len());
    for e in entries {
        let sample_paths = match read_session_manifest(backup_dir, &e.id) {
            Ok(m) => m
                .files
                .iter()
                .take(3)
                .map(|f| f.original_path.display().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };

        out.push(SessionInfo {
            id: e.id,
            timestamp: e.timestamp,
            operation: e.operation,
            success: e.success,
            files: e.files,
            sample_paths,
        });
    }

    Ok(out)
}

/// Show detailed information about a session
pub fn show_session(backup_dir: &Path, req: ShowRequest) -> Result<ShowResponse> {
    let session_id = resolve_session_id(backup_dir, &req.id)?;
    let manifest = read_session_manifest(backup_dir, &session_id)?;
    let session_path = session_path(backup_dir, &session_id);

    let total_size = if req.verbose {
        Some(manifest.files.iter().map(|f| f.size_bytes).sum())
    } else {
        None
    };

    Ok(ShowResponse {
        manifest,
        session_path,
        total_size,
    })
}

/// Put backed-up files back at their original paths.
///
/// A file whose current content differs from the copy is a conflict and is
/// left alone unless `force` is set.
pub fn restore_session(backup_dir: &Path, req: RestoreRequest) -> Result<RestoreResult> {
    let session_id = resolve_session_id(backup_dir, &req.session_id)?;
    let manifest = read_session_manifest(backup_dir, &session_id)?;
    let base = session_path(backup_dir, &session_id);

    let mut restored = Vec::new();
    let mut unchanged = Vec::new();
    let mut conflicts = Vec::new();
    let mut diffs = Vec::new();
    let mut to_write = Vec::new();

    for file in &manifest.files {
        let stored = base.join(&file.stored_name);

        if req.verify_checksum
            && let Some(expected) = &file.checksum
        {
            let actual = stream_blake3(&stored)?;
            if &actual != expected {
                bail!(
                    "checksum mismatch for {} in session {} (expected {}, got {})",
                    file.original_path.display(),
                    session_id,
                    expected,
                    actual
                );
            }
        }

        let backed_up = fs::read_to_string(&stored)
            .with_context(|| format!("read backup copy: {}", stored.display()))?;
        let current = read_to_string_or_empty(&file.original_path)?;

        if current == backed_up {
            unchanged.push(file.original_path.clone());
            continue;
        }

        if req.show_diff {
            diffs.push(FileDiff {
                path: file.original_path.clone(),
                unified: unified_diff(&current, &backed_up, "current", &session_id),
            });
        }

        if req.force {
            to_write.push((file.original_path.clone(), backed_up));
        } else {
            conflicts.push(file.original_path.clone());
        }
    }

    let mut backed_up_current = false;
    let mut backup_session_id = None;

    if !req.dry_run && !to_write.is_empty() {
        if req.backup_current {
            let mut mgr = BackupManager::begin(backup_dir, "restore")?;
            for (path, _) in &to_write {
                mgr.backup_file(path)?;
            }
            mgr.finalize(true)?;
            backed_up_current = true;
            backup_session_id = Some(mgr.session_id().to_string());
        }

        for (path, content) in to_write {
            let target = resolve_write_target(&path)?;
            write_atomic(&target, content.as_bytes(), Some(0o644))?;
            debug!(path = %path.display(), session = %session_id, "restored");
            restored.push(path);
        }
    }

    Ok(RestoreResult {
        session_id,
        restored,
        unchanged,
        conflicts,
        diffs: req.show_diff.then_some(diffs),
        backed_up_current,
        backup_session_id,
    })
}

/// Remove sessions by age and/or count.
pub fn cleanup_sessions(backup_dir: &Path, req: CleanupRequest) -> Result<CleanupResult> {
    let cutoff = req.older_than.as_deref().map(parse_relative_time).transpose()?;

    let mut entries = list_sessions(backup_dir)?;
    if !req.include_incomplete {
        entries.retain(|e| session_is_complete(backup_dir, &e.id));
    }

    // Newest first so keep_latest keeps the head
    entries.sort_by(|a, b| {
        parse_ts(&b.timestamp)
            .cmp(&parse_ts(&a.timestamp))
            .then_with(|| b.id.cmp(&a.id))
    });

    let mut doomed = Vec::new();
    for (rank, e) in entries.iter().enumerate() {
        let too_old = match (cutoff, parse_ts(&e.timestamp)) {
            (Some(cut), Some(ts)) => ts < cut,
            _ => false,
        };
        let beyond_keep = req.keep_latest.is_some_and(|keep| rank >= keep);
        if too_old || beyond_keep {
            doomed.push(e.id.clone());
        }
    }

    let mut result = CleanupResult {
        sessions_removed: Vec::new(),
        bytes_freed: 0,
        errors: Vec::new(),
    };

    for id in doomed {
        let dir = session_path(backup_dir, &id);
        let size = dir_size(&dir).unwrap_or(0);
        if !req.dry_run
            && dir.exists()
            && let Err(e) = fs::remove_dir_all(&dir)
        {
            warn!(session = %id, error = %e, "failed to remove backup session");
            result.errors.push(format!("{id}: {e}"));
            continue;
        }
        result.bytes_freed += size;
        result.sessions_removed.push(id);
    }

    if !req.dry_run && !result.sessions_removed.is_empty() {
        let removed = result.sessions_removed.clone();
        rewrite_index(backup_dir, |e| !removed.contains(&e.id))?;
    }

    Ok(result)
}

/// Keep the newest `keep` completed sessions; 0 keeps everything.
pub fn apply_retention(backup_dir: &Path, keep: usize) -> Result<CleanupResult> {
    if keep == 0 {
        return Ok(CleanupResult {
            sessions_removed: Vec::new(),
            bytes_freed: 0,
            errors: Vec::new(),
        });
    }
    cleanup_sessions(
        backup_dir,
        CleanupRequest {
            older_than: None,
            keep_latest: Some(keep),
            dry_run: false,
            include_incomplete: false,
        },
    )
}

/// Resolve session ID (supports full, short, and aliases)
pub fn resolve_session_id(backup_dir: &Path, query: &str) -> Result<String> {
    match resolve_session_id_internal(backup_dir, query)? {
        SessionIdResolution::Single(id) => Ok(id),
        SessionIdResolution::Multiple(matches) => {
            bail!(
                "Ambiguous session ID '{}'. Matches: {}",
                query,
                matches.join(", ")
            );
        }
        SessionIdResolution::NotFound => {
            bail!("No session found matching '{}'", query);
        }
    }
}

fn resolve_session_id_internal(backup_dir: &Path, query: &str) -> Result<SessionIdResolution> {
    let sessions = list_sessions(backup_dir)?;

    let entries: Vec<(String, String, bool, Option<DateTime<Utc>>)> = sessions
        .iter()
        .filter(|s| session_is_complete(backup_dir, &s.id))
        .map(|s| (s.id.clone(), s.timestamp.clone(), s.success, parse_ts(&s.timestamp)))
        .collect();

    // Aliases pick the newest matching session
    let newest = |successful_only: bool| {
        let mut cands: Vec<_> = entries
            .iter()
            .filter(|(_, _, success, _)| *success || !successful_only)
            .collect();
        cands.sort_by(|a, b| b.3.cmp(&a.3).then_with(|| b.1.cmp(&a.1)));
        match cands.first() {
            Some((id, ..)) => SessionIdResolution::Single(id.clone()),
            None => SessionIdResolution::NotFound,
        }
    };
    match query {
        "latest" => return Ok(newest(false)),
        "last-successful" => return Ok(newest(true)),
        _ => {}
    }

    let mut matches: Vec<(String, Option<DateTime<Utc>>, String)> = Vec::new();
    for (id, ts, _success, parsed) in &entries {
        if id == query {
            return Ok(SessionIdResolution::Single(id.clone()));
        }
        // Short ID (require a minimal length to reduce noise)
        let short = query.len() >= 8 && id.ends_with(query);
        // Date prefix like "2025-08-14"
        let dated = query.contains('-') && id.starts_with(query);
        if short || dated {
            matches.push((id.clone(), *parsed, ts.clone()));
        }
    }

    matches.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.2.cmp(&a.2)));

    Ok(match matches.len() {
        0 => SessionIdResolution::NotFound,
        1 => SessionIdResolution::Single(matches[0].0.clone()),
        _ => SessionIdResolution::Multiple(matches.into_iter().map(|(id, _, _)| id).collect()),
    })
}

fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse "7d", "2w", "24h", "90m", "45s" or an RFC3339 instant into a lower bound
fn parse_relative_time(time_str: &str) -> Result<DateTime<Utc>> {
    let time_str = time_str.trim();
    if time_str.is_empty() {
        bail!("Empty time specification");
    }

    if let Some(dt) = parse_ts(time_str) {
        return Ok(dt);
    }

    let (number_str, unit) = match time_str.char_indices().last() {
        Some((idx, unit @ ('w' | 'd' | 'h' | 'm' | 's'))) => (&time_str[..idx], unit),
        _ => bail!("Invalid time unit in '{}'. Use w, d, h, m, or s", time_str),
    };

    let number: i64 = number_str
        .parse()
        .with_context(|| format!("Invalid number '{}' in time specification", number_str))?;
    if number < 0 {
        bail!("Negative durations are not allowed: '{}'", time_str);
    }

    let duration = match unit {
        'w' => Duration::weeks(number),
        'd' => Duration::days(number),
        'h' => Duration::hours(number),
        'm' => Duration::minutes(number),
        _ => Duration::seconds(number),
    };

    Ok(Utc::now() - duration)
}

fn unified_diff(current: &str, backed_up: &str, current_label: &str, session_id: &str) -> String {
    TextDiff::from_lines(current, backed_up)
        .unified_diff()
        .context_radius(3)
        .header(current_label, &format!("backup {session_id}"))
        .to_string()
}

fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    if !dir.exists() {
        return Ok(0);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let md = entry.metadata()?;
        total += if md.is_dir() {
            dir_size(&entry.path())?
        } else {
            md.len()
        };
    }
    Ok(total)
}

//! Backup sessions for files brevsync is about to rewrite.
//!
//! Each session lives in `<backup_dir>/<ID>` with a manifest and a DONE
//! marker for crash safety. Copies are staged in `<backup_dir>/tmp/<ID>` and
//! atomically renamed into place on finalize.

use anyhow::{Context, Result, bail};
use blake3::Hasher as Blake3;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::debug;

/// Per-file metadata recorded in the session manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBackupMeta {
    pub original_path: PathBuf,       // absolute path that was backed up
    pub stored_name: PathBuf,         // session-relative copy
    pub size_bytes: u64,              // backed-up content size
    pub last_modified: u64,           // secs since UNIX_EPOCH (source file)
    pub checksum: Option<String>,     // blake3:<hex>
    pub symlink: bool,                // whether source was a symlink
    pub link_target: Option<PathBuf>, // recorded link target (if any)
}

/// Manifest describing a completed or in-progress session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub id: String,        // e.g., 2025-08-14T10-30-15Z_a9Jh5xQ2pL
    pub timestamp: String, // RFC3339 creation time
    pub operation: String, // "sync" | "restore"
    pub args: Vec<String>, // CLI args snapshot
    pub success: bool,     // set on finalize
    pub last_updated: String,
    pub files: Vec<FileBackupMeta>,
}

/// Lightweight index record for quick session listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    pub id: String,
    pub timestamp: String,
    pub success: bool,
    pub files: usize,
    pub operation: String,
}

/// Manager creating a single session; stage in tmp, then finalize.
#[derive(Debug)]
pub struct BackupManager {
    backup_dir: PathBuf,
    session_id: String,
    session_tmp_dir: PathBuf,   // .../tmp/<id>
    session_final_dir: PathBuf, // .../<id>
    manifest: SessionManifest,
    finalized: bool,
}

impl BackupManager {
    /// Start a new session under `<backup_dir>/tmp/<ID>`.
    pub fn begin(backup_dir: &Path, operation: &str) -> Result<Self> {
        let tmp_sessions_dir = backup_dir.join("tmp");
        fs::create_dir_all(&tmp_sessions_dir)
            .with_context(|| format!("create backup tmp dir: {}", tmp_sessions_dir.display()))?;

        let session_id = generate_session_id();
        let session_tmp_dir = tmp_sessions_dir.join(&session_id);
        let session_final_dir = backup_dir.join(&session_id);

        fs::create_dir_all(&session_tmp_dir)
            .with_context(|| format!("create session tmp: {}", session_tmp_dir.display()))?;

        let now = Utc::now().to_rfc3339();
        let manifest = SessionManifest {
            id: session_id.clone(),
            timestamp: now.clone(),
            operation: operation.into(),
            args: std::env::args().collect(),
            success: false,
            last_updated: now,
            files: Vec::new(),
        };

        Ok(Self {
            backup_dir: backup_dir.to_path_buf(),
            session_id,
            session_tmp_dir,
            session_final_dir,
            manifest,
            finalized: false,
        })
    }

    /// Copy `source` into the session; follows symlinks for content.
    ///
    /// Returns `false` without recording anything when `source` does not
    /// exist: there is nothing to lose yet.
    pub fn backup_file(&mut self, source: &Path) -> Result<bool> {
        let meta = match fs::symlink_metadata(source) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %source.display(), "nothing to back up");
                return Ok(false);
            }
            Err(e) => {
                return Err(
                    anyhow::Error::new(e).context(format!("stat source: {}", source.display()))
                );
            }
        };
        let ty = meta.file_type();
        if !(ty.is_file() || ty.is_symlink()) {
            bail!("unsupported file type for backup: {}", source.display());
        }

        let stored_name = stored_name_for(source, self.manifest.files.len());
        let backup_path = self.session_tmp_dir.join(&stored_name);

        let (symlink, link_target) = if ty.is_symlink() {
            let t = fs::read_link(source)
                .with_context(|| format!("readlink: {}", source.display()))?;
            (true, Some(t))
        } else {
            (false, None)
        };

        // Copy content: a symlink is backed up by its target's bytes.
        if symlink {
            let resolved = fs::canonicalize(source).with_context(|| {
                format!("resolve symlink target (broken?): {}", source.display())
            })?;
            fs::copy(&resolved, &backup_path)
                .with_context(|| format!("copy target to backup: {}", backup_path.display()))?;
        } else {
            fs::copy(source, &backup_path)
                .with_context(|| format!("copy file to backup: {}", backup_path.display()))?;
        }

        let size_bytes = fs::metadata(&backup_path)
            .with_context(|| format!("stat backup: {}", backup_path.display()))?
            .len();
        let last_modified = meta
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let checksum = Some(stream_blake3(&backup_path)?);

        self.manifest.files.push(FileBackupMeta {
            original_path: source.to_path_buf(),
            stored_name,
            size_bytes,
            last_modified,
            checksum,
            symlink,
            link_target,
        });
        self.manifest.last_updated = Utc::now().to_rfc3339();
        Ok(true)
    }

    /// Session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Session directory (tmp while unfinalized; final after finalize).
    pub fn session_dir(&self) -> &Path {
        if self.finalized {
            &self.session_final_dir
        } else {
            &self.session_tmp_dir
        }
    }

    /// Number of files recorded so far.
    pub fn file_count(&self) -> usize {
        self.manifest.files.len()
    }

    /// Write manifest, atomically rename tmp→final, create DONE, append index.
    pub fn finalize(&mut self, success: bool) -> Result<()> {
        if self.finalized {
            return Ok(());
        }

        self.manifest.success = success;
        self.manifest.last_updated = Utc::now().to_rfc3339();

        let manifest_path = self.session_tmp_dir.join("manifest.json");
        let manifest_tmp = self.session_tmp_dir.join("manifest.json.tmp");
        let manifest_text =
            serde_json::to_string_pretty(&self.manifest).context("serialize manifest")?;
        fs::write(&manifest_tmp, &manifest_text)
            .with_context(|| format!("write manifest tmp: {}", manifest_tmp.display()))?;
        File::open(&manifest_tmp)?.sync_all().ok();
        fs::rename(&manifest_tmp, &manifest_path)?;
        let _ = sync_dir(&self.session_tmp_dir);

        fs::rename(&self.session_tmp_dir, &self.session_final_dir).with_context(|| {
            format!(
                "rename {} → {}",
                self.session_tmp_dir.display(),
                self.session_final_dir.display()
            )
        })?;
        let _ = sync_dir(&self.backup_dir);

        let done_path = self.session_final_dir.join("DONE");
        fs::write(&done_path, "")
            .with_context(|| format!("create DONE: {}", done_path.display()))?;
        File::open(&done_path)?.sync_all().ok();
        let _ = sync_dir(&self.session_final_dir);

        // Only now is the session complete on disk
        self.finalized = true;

        self.append_to_index()?;
        debug!(session = %self.session_id, files = self.file_count(), "backup session finalized");
        Ok(())
    }

    fn append_to_index(&self) -> Result<()> {
        let index_path = self.backup_dir.join("index.jsonl");
        let lock_path = self.backup_dir.join("index.lock");
        let _guard = acquire_lock(&lock_path)?;

        let entry = SessionIndexEntry {
            id: self.manifest.id.clone(),
            timestamp: self.manifest.timestamp.clone(),
            success: self.manifest.success,
            files: self.manifest.files.len(),
            operation: self.manifest.operation.clone(),
        };
        let line = serde_json::to_string(&entry).context("serialize index entry")?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .with_context(|| format!("open index: {}", index_path.display()))?;
        writeln!(f, "{line}").context("append index")?;
        f.sync_all().ok();

        Ok(())
    }
}

impl Drop for BackupManager {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.finalize(false); // best-effort failure finalize
        }
    }
}

/// Path of a finalized session directory.
pub fn session_path(backup_dir: &Path, session_id: &str) -> PathBuf {
    backup_dir.join(session_id)
}

/// Whether a session has its DONE marker.
pub fn session_is_complete(backup_dir: &Path, session_id: &str) -> bool {
    session_path(backup_dir, session_id).join("DONE").exists()
}

/// Read the append-only index; ignores malformed lines.
pub fn list_sessions(backup_dir: &Path) -> Result<Vec<SessionIndexEntry>> {
    let index_path = backup_dir.join("index.jsonl");
    if !index_path.exists() {
        return Ok(Vec::new());
    }

    let file =
        File::open(&index_path).with_context(|| format!("open index: {}", index_path.display()))?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read index line {}", i + 1))?;
        let t = line.trim();
        if t.is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionIndexEntry>(t) {
            Ok(e) => out.push(e),
            Err(_) => continue, // tolerate partial/corrupt lines
        }
    }
    Ok(out)
}

/// Rewrite the index keeping only entries accepted by `keep`.
pub fn rewrite_index<F>(backup_dir: &Path, mut keep: F) -> Result<()>
where
    F: FnMut(&SessionIndexEntry) -> bool,
{
    let index_path = backup_dir.join("index.jsonl");
    let lock_path = backup_dir.join("index.lock");
    let _guard = acquire_lock(&lock_path)?;

    let mut text = String::new();
    for entry in list_sessions(backup_dir)?.into_iter().filter(|e| keep(e)) {
        text.push_str(&serde_json::to_string(&entry).context("serialize index entry")?);
        text.push('\n');
    }
    crate::infra::io::write_atomic(&index_path, text.as_bytes(), None)
}

/// Load a session manifest; requires DONE to be present.
pub fn read_session_manifest(backup_dir: &Path, session_id: &str) -> Result<SessionManifest> {
    let base = session_path(backup_dir, session_id);
    if !base.join("DONE").exists() {
        bail!("Session {} is incomplete (missing DONE)", session_id);
    }
    let manifest_path = base.join("manifest.json");
    let s = fs::read_to_string(&manifest_path)
        .with_context(|| format!("read manifest: {}", manifest_path.display()))?;
    let m: SessionManifest = serde_json::from_str(&s)
        .with_context(|| format!("parse manifest: {}", manifest_path.display()))?;
    Ok(m)
}

/// Stream a file into a blake3 digest as `blake3:<hex>`.
pub fn stream_blake3(path: &Path) -> Result<String> {
    let mut f =
        File::open(path).with_context(|| format!("open for checksum: {}", path.display()))?;
    let mut hasher = Blake3::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Flat name for a backed-up file inside the session directory.
fn stored_name_for(source: &Path, index: usize) -> PathBuf {
    let base = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".into());
    if index == 0 {
        PathBuf::from(base)
    } else {
        PathBuf::from(format!("{index}-{base}"))
    }
}

/// Cross-platform directory fsync helper.
#[cfg(unix)]
fn sync_dir(p: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let f = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(p)?;
    f.sync_all()
}

#[cfg(windows)]
fn sync_dir(_p: &Path) -> std::io::Result<()> {
    // Windows does not expose a reliable directory fsync; best-effort no-op.
    Ok(())
}

/// Generate a sortable, filesystem-safe session ID.
fn generate_session_id() -> String {
    let ts = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let alphabet = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..10)
        .map(|_| {
            let idx = rng.random_range(0..alphabet.len());
            alphabet[idx] as char
        })
        .collect();
    format!("{}_{}", ts, suffix)
}

/// Acquire a simple file lock; guard deletes the lock on drop.
struct LockGuard {
    path: PathBuf,
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.sync_all();
        let _ = fs::remove_file(&self.path);
    }
}

fn acquire_lock(lock_path: &Path) -> Result<LockGuard> {
    match create_lock_file(lock_path) {
        Ok(guard) => Ok(guard),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            // A lock older than a minute is left over from a crashed run
            if let Ok(meta) = fs::metadata(lock_path)
                && let Ok(modified) = meta.modified()
                && let Ok(elapsed) = modified.elapsed()
                && elapsed.as_secs() > 60
                && fs::remove_file(lock_path).is_ok()
            {
                return create_lock_file(lock_path).with_context(|| {
                    format!("acquire lock after stale cleanup: {}", lock_path.display())
                });
            }
            Err(anyhow::Error::new(e).context(format!("acquire lock: {}", lock_path.display())))
        }
        Err(e) => {
            Err(anyhow::Error::new(e).context(format!("acquire lock: {}", lock_path.display())))
        }
    }
}

fn create_lock_file(lock_path: &Path) -> std::io::Result<LockGuard> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)?;
    writeln!(file, "pid={}", std::process::id()).ok();
    file.sync_all().ok();
    Ok(LockGuard {
        path: lock_path.to_path_buf(),
        file,
    })
}

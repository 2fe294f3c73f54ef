use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Read a UTF-8 file; a missing file reads as empty text.
pub fn read_to_string_or_empty(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(anyhow::Error::new(e).context(format!("read {}", path.display()))),
    }
}

/// Follow a symlink so that writes replace the link target, not the link.
pub fn resolve_write_target(path: &Path) -> Result<PathBuf> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::canonicalize(path)
            .with_context(|| format!("resolve symlink target (broken?): {}", path.display())),
        _ => Ok(path.to_path_buf()),
    }
}

/// Atomically replace `path` with `data`.
///
/// The data goes to a temp file in the same directory, is fsynced, then
/// renamed over the destination. `mode` applies to new files; an existing
/// file keeps its permissions.
pub fn write_atomic(path: &Path, data: &[u8], mode: Option<u32>) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))?;

    let existing = fs::metadata(path).map(|m| m.permissions()).ok();

    let tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;

    let mut file = tmp.as_file();
    file.write_all(data)
        .with_context(|| format!("write temp file for {}", path.display()))?;
    file.sync_all()?;

    if let Some(perms) = existing {
        fs::set_permissions(tmp.path(), perms).context("set temp permissions")?;
    } else {
        set_mode(tmp.path(), mode.unwrap_or(0o644))?;
    }

    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("replace {}", path.display()))?;

    // fsync parent dir to ensure durability on Unix
    #[cfg(unix)]
    {
        if let Ok(parent_file) = fs::File::open(dir) {
            let _ = parent_file.sync_all();
        }
    }

    Ok(())
}

/// Create `dir` (and parents) with `mode` applied to the leaf when it is new.
pub fn ensure_dir(dir: &Path, mode: u32) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))?;
    set_mode(dir, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("chmod {:o} {}", mode, path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Replaces `path` with `content` by staging a sibling file, flushing it to
/// disk, and renaming it into place. Readers never observe a partial record,
/// and a crash mid-write leaves the previous record intact.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let staging = staging_path(path)?;
    if let Some(dir) = staging.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating state directory {}", dir.display()))?;
    }

    let mut file = File::create(&staging)
        .with_context(|| format!("staging record at {}", staging.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("writing staged record {}", staging.display()))?;
    file.sync_all()
        .with_context(|| format!("flushing staged record {}", staging.display()))?;
    drop(file);

    fs::rename(&staging, path)
        .with_context(|| format!("publishing staged record over {}", path.display()))
}

/// Hidden sibling name for the staged write. Process id plus a process-wide
/// sequence keeps concurrent writers off each other's staging files.
fn staging_path(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        bail!("atomic write needs a non-empty destination");
    }
    if path.is_dir() {
        bail!("atomic write destination {} is a directory", path.display());
    }
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record");
    let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
    Ok(path.with_file_name(format!(".{name}.{}-{seq}.swap", std::process::id())))
}

use crate::models::Snapshot;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const LAST_HTML: &str = "last.html";
pub const LAST_JSON: &str = "last.json";

// ── Snapshot store ────────────────────────────────────────────────────────────

/// Last raw page and last parsed snapshot of one account, under
/// `<root>/<account>/`.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn open(root: &Path, account: &str) -> Result<Self> {
        let dir = root.join(sanitize_account(account));
        fs::create_dir_all(&dir)
            .with_context(|| format!("Could not create dir {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_html(&self, html: &str) -> Result<()> {
        let path = self.dir.join(LAST_HTML);
        write_atomic(&path, html.as_bytes())?;
        debug!("Wrote {} bytes to {:?}", html.len(), path);
        Ok(())
    }

    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.dir.join(LAST_JSON);
        let json = serde_json::to_vec_pretty(snapshot).context("Serialising snapshot failed")?;
        write_atomic(&path, &json)?;
        debug!("Wrote snapshot to {:?}", path);
        Ok(())
    }

    pub fn load_html(&self) -> Result<Option<String>> {
        let path = self.dir.join(LAST_HTML);
        if !path.exists() {
            return Ok(None);
        }
        let html = fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        Ok(Some(html))
    }

    /// Last stored snapshot, used to know the subjects before the first
    /// live refresh has completed.
    pub fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        let path = self.dir.join(LAST_JSON);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid snapshot JSON in {:?}", path))?;
        info!("Loaded stored snapshot with {} subjects from {:?}", snapshot.grades.len(), path);
        Ok(Some(snapshot))
    }
}

/// Keep account names usable as a single directory component.
pub(crate) fn sanitize_account(account: &str) -> String {
    let cleaned: String = account
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "default".to_string() } else { cleaned }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {:?}", tmp))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {:?} into place", tmp))?;
    Ok(())
}

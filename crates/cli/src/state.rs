//! Registry state kept between invocations as a JSON snapshot.
//!
//! The state file is guarded by an exclusive lock for the whole
//! load → apply → save cycle, so at most one invocation writes at a time.

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use idreg_registry::{IdentityRegistry, RegistrySnapshot};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Holds the lock on `<state>.lock` until dropped. The lock file itself is
/// never removed, so every invocation contends on the same inode.
pub struct StateStore {
    path: PathBuf,
    lock: File,
}

impl StateStore {
    /// Take the exclusive lock on `path`'s state.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create state directory {}", dir.display()))?;
        }

        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;

        if let Err(err) = lock.try_lock_exclusive() {
            return Err(anyhow!(
                "State file {} is locked by another invocation ({}). \
                 Retry once it finishes.",
                path.display(),
                err
            ));
        }
        lock.set_len(0)?;
        writeln!(&lock, "pid={}", std::process::id())?;

        Ok(Self { path, lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<IdentityRegistry> {
        if !self.exists() {
            anyhow::bail!(
                "No registry state at {}; run `idreg-cli init --admin <principal>` first",
                self.path.display()
            );
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let snapshot: RegistrySnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        let registry = IdentityRegistry::from_snapshot(snapshot)
            .with_context(|| format!("inconsistent registry state in {}", self.path.display()))?;

        debug!(path = %self.path.display(), "registry state loaded");
        Ok(registry)
    }

    /// Write the snapshot next to the target and rename it into place.
    pub fn save(&self, registry: &IdentityRegistry) -> Result<()> {
        let json = serde_json::to_string_pretty(&registry.snapshot())?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), "registry state saved");
        Ok(())
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        let _ = self.lock.unlock();
    }
}

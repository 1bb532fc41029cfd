use anyhow::{Context, Result};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::ArchiveError;

#[derive(Debug, Clone, Default)]
pub struct ChannelLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

/// Held for the duration of one run; dropping it releases both the
/// in-process slot and the advisory file lock.
#[derive(Debug)]
pub struct ChannelLockGuard {
    held: Arc<Mutex<HashSet<String>>>,
    channel_id: String,
    file: File,
}

static PROCESS_LOCKS: OnceLock<ChannelLocks> = OnceLock::new();

pub fn lock_file_path(guild_dir: &Path, channel_id: &str) -> PathBuf {
    guild_dir.join(format!("channel-{channel_id}.lock"))
}

impl ChannelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by every run started from this process.
    pub fn process() -> &'static ChannelLocks {
        PROCESS_LOCKS.get_or_init(ChannelLocks::new)
    }

    pub fn is_held(&self, channel_id: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(channel_id))
            .unwrap_or(false)
    }

    /// Rejects a second run for the same channel, whether it comes from this
    /// process or another one sharing the logs directory.
    pub fn acquire(&self, guild_dir: &Path, channel_id: &str) -> Result<ChannelLockGuard> {
        {
            let mut held = self
                .held
                .lock()
                .map_err(|_| anyhow::anyhow!("channel lock registry poisoned"))?;
            if !held.insert(channel_id.to_string()) {
                return Err(ArchiveError::ChannelBusy(channel_id.to_string()).into());
            }
        }

        match open_locked(guild_dir, channel_id) {
            Ok(file) => Ok(ChannelLockGuard {
                held: Arc::clone(&self.held),
                channel_id: channel_id.to_string(),
                file,
            }),
            Err(err) => {
                if let Ok(mut held) = self.held.lock() {
                    held.remove(channel_id);
                }
                Err(err)
            }
        }
    }
}

fn open_locked(guild_dir: &Path, channel_id: &str) -> Result<File> {
    fs::create_dir_all(guild_dir)
        .with_context(|| format!("failed to create {}", guild_dir.display()))?;
    let path = lock_file_path(guild_dir, channel_id);
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    if file.try_lock_exclusive().is_err() {
        return Err(ArchiveError::ChannelBusy(channel_id.to_string()).into());
    }
    Ok(file)
}

impl Drop for ChannelLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.channel_id);
        }
    }
}

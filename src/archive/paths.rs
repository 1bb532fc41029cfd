use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;

pub const ATTACHMENTS_DIR_NAME: &str = "attachments";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub guild_dir: PathBuf,
    pub channel_dir: PathBuf,
    pub attachments_dir: PathBuf,
}

pub fn plan(base: &Path, guild_id: &str, channel_id: &str) -> ArchiveLayout {
    let guild_dir = base.join(format!("guild-{guild_id}"));
    let channel_dir = guild_dir.join(format!("channel-{channel_id}"));
    let attachments_dir = channel_dir.join(ATTACHMENTS_DIR_NAME);
    ArchiveLayout {
        guild_dir,
        channel_dir,
        attachments_dir,
    }
}

pub fn ensure(base: &Path, guild_id: &str, channel_id: &str) -> Result<ArchiveLayout> {
    let layout = plan(base, guild_id, channel_id);
    for dir in [
        &layout.guild_dir,
        &layout.channel_dir,
        &layout.attachments_dir,
    ] {
        fs::create_dir_all(dir).map_err(|err| ArchiveError::storage(dir, err))?;
    }
    Ok(layout)
}

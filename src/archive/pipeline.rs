use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;

use crate::archive::attachments::AttachmentStats;
use crate::archive::document::{DocumentHeader, DocumentPaths, write_documents};
use crate::archive::history::{FetchOptions, fetch_history};
use crate::archive::lock::ChannelLocks;
use crate::archive::paths;
use crate::archive::source::HistorySource;
use crate::archive::zone::ArchiveZone;

#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub guild_id: String,
    pub channel_id: String,
    pub author_filter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub logs_dir: PathBuf,
    pub zone: ArchiveZone,
    pub attachment_workers: usize,
}

#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub message_count: usize,
    pub pages: usize,
    pub raw_messages: usize,
    pub attachments: AttachmentStats,
    pub channel_dir: PathBuf,
    pub documents: DocumentPaths,
}

impl ArchiveOutcome {
    pub fn reply(&self) -> String {
        format!(
            "Logged {} messages to {} and generated {}. Attachments have been saved in the '{}' directory.",
            self.message_count,
            self.documents.json_file_name(),
            self.documents.html_file_name(),
            paths::ATTACHMENTS_DIR_NAME,
        )
    }
}

/// Nothing is written past the first unrecovered error; attachment failures
/// are recovered inside the history walk.
pub fn run_archive<S: HistorySource + ?Sized>(
    source: &S,
    locks: &ChannelLocks,
    settings: &RunSettings,
    request: &ArchiveRequest,
    header: &DocumentHeader,
) -> Result<ArchiveOutcome> {
    let layout = paths::ensure(&settings.logs_dir, &request.guild_id, &request.channel_id)?;
    let _guard = locks.acquire(&layout.guild_dir, &request.channel_id)?;

    let history = fetch_history(
        source,
        &FetchOptions {
            channel_id: &request.channel_id,
            author_filter: request.author_filter.as_deref(),
            attachments_dir: &layout.attachments_dir,
            attachment_workers: settings.attachment_workers,
        },
    )?;

    let documents = write_documents(
        &layout.channel_dir,
        &history.messages,
        header,
        &settings.zone,
        &Utc::now(),
    )?;

    Ok(ArchiveOutcome {
        message_count: history.messages.len(),
        pages: history.pages,
        raw_messages: history.raw_messages,
        attachments: history.attachments,
        channel_dir: layout.channel_dir,
        documents,
    })
}

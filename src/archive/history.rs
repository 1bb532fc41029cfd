use anyhow::Result;
use std::cmp::Ordering;
use std::path::Path;

use crate::archive::attachments::{AttachmentStats, archive_attachments};
use crate::archive::model::{Message, compare_ids, oldest_id};
use crate::archive::source::HistorySource;
use crate::error::ArchiveError;

/// Page size requested from the remote API; a shorter page ends the history.
pub const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct FetchOptions<'a> {
    pub channel_id: &'a str,
    pub author_filter: Option<&'a str>,
    pub attachments_dir: &'a Path,
    pub attachment_workers: usize,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryOutcome {
    pub messages: Vec<Message>,
    pub pages: usize,
    pub raw_messages: usize,
    pub attachments: AttachmentStats,
}

/// The author filter runs once per page, right after retrieval; termination
/// only looks at the raw page length. Page errors abort the whole walk.
pub fn fetch_history<S: HistorySource + ?Sized>(
    source: &S,
    opts: &FetchOptions<'_>,
) -> Result<HistoryOutcome> {
    let mut out = HistoryOutcome::default();
    let mut before: Option<String> = None;

    loop {
        let page = source.fetch_page(opts.channel_id, before.as_deref(), PAGE_SIZE)?;
        out.pages += 1;
        out.raw_messages += page.len();
        let exhausted = page.len() < PAGE_SIZE;
        let cursor = oldest_id(&page).map(str::to_owned);

        let mut kept = match opts.author_filter {
            Some(author_id) => page
                .into_iter()
                .filter(|m| m.author.id == author_id)
                .collect::<Vec<_>>(),
            None => page,
        };
        let stats = archive_attachments(
            source,
            opts.channel_id,
            &mut kept,
            opts.attachments_dir,
            opts.attachment_workers,
        );
        out.attachments.add(stats);
        out.messages.append(&mut kept);

        if exhausted {
            break;
        }
        let Some(next) = cursor else {
            break;
        };
        if let Some(prev) = before.as_deref()
            && compare_ids(&next, prev) != Ordering::Less
        {
            return Err(ArchiveError::StalledCursor(next).into());
        }
        before = Some(next);
    }

    out.messages.sort_by(|a, b| compare_ids(&a.id, &b.id));
    out.messages.dedup_by(|a, b| a.id == b.id);
    Ok(out)
}

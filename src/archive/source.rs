use anyhow::Result;
use std::io::Read;

use crate::archive::model::Message;

/// Remote side of an archive run: paged channel history plus raw media.
///
/// Pages come back newest first, at most `limit` long, holding only messages
/// strictly older than `before` when a cursor is given. Attachment bodies are
/// handed out as readers so callers can stream them to disk.
pub trait HistorySource: Sync {
    fn fetch_page(&self, channel_id: &str, before: Option<&str>, limit: usize)
    -> Result<Vec<Message>>;

    fn open_attachment(&self, url: &str) -> Result<Box<dyn Read + Send>>;
}

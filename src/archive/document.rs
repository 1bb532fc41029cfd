use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::markdown::{escape_html, render_message};
use crate::archive::model::{Attachment, Message};
use crate::archive::zone::ArchiveZone;
use crate::error::ArchiveError;

pub const TOOL_NAME: &str = "chanlog";
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

const STYLE: &str = "\
body { font-family: Arial, sans-serif; line-height: 1.6; padding: 20px; max-width: 800px; margin: 0 auto; }
.header { text-align: center; margin-bottom: 20px; }
.header h1 { margin-bottom: 5px; }
.header .info { margin-top: 10px; }
.message { border: 1px solid #ddd; margin-bottom: 10px; padding: 10px; border-radius: 5px; }
.author { font-weight: bold; }
.timestamp, .ids { color: #666; font-size: 0.8em; }
.content { margin-top: 5px; }
.attachment { margin-top: 5px; }
.attachment a { color: #0066cc; }
.attachment .missing { color: #a33; font-size: 0.8em; }
code { background-color: #f4f4f4; padding: 2px 4px; border-radius: 3px; }
pre { background-color: #f4f4f4; padding: 10px; border-radius: 5px; overflow-x: auto; }
img { max-width: 100%; height: auto; }
";

#[derive(Debug, Clone)]
pub struct DocumentHeader {
    pub guild_name: String,
    pub channel_name: String,
    pub filtered_for: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPaths {
    pub stem: String,
    pub json_path: PathBuf,
    pub html_path: PathBuf,
}

impl DocumentPaths {
    pub fn json_file_name(&self) -> String {
        format!("{}.json", self.stem)
    }

    pub fn html_file_name(&self) -> String {
        format!("{}.html", self.stem)
    }
}

pub fn render_record(messages: &[Message]) -> Result<String> {
    Ok(serde_json::to_string_pretty(messages)?)
}

pub fn parse_record(raw: &str) -> Result<Vec<Message>> {
    Ok(serde_json::from_str(raw)?)
}

pub fn is_image_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

pub fn encode_relative_href(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn render_attachment(out: &mut String, attachment: &Attachment) {
    let name = escape_html(&attachment.name);
    out.push_str("<div class=\"attachment\">");
    match &attachment.local_path {
        Some(local) => {
            let href = escape_html(&encode_relative_href(local));
            out.push_str(&format!(
                "<a href=\"{href}\" target=\"_blank\">{name}</a>"
            ));
            if is_image_name(&attachment.name) {
                out.push_str(&format!("<br><img src=\"{href}\" alt=\"{name}\">"));
            }
        }
        None => {
            out.push_str(&format!(
                "<a href=\"{}\" target=\"_blank\" rel=\"noreferrer\">{name}</a> <span class=\"missing\">(not archived)</span>",
                escape_html(&attachment.url)
            ));
        }
    }
    out.push_str("</div>\n");
}

fn render_message_block(out: &mut String, message: &Message, zone: &ArchiveZone) {
    out.push_str("<div class=\"message\">\n");
    out.push_str(&format!(
        "<div class=\"author\">{}</div>\n",
        escape_html(&message.author.display_name)
    ));
    out.push_str(&format!(
        "<div class=\"timestamp\">{}</div>\n",
        escape_html(&zone.display(&message.created_at))
    ));
    out.push_str(&format!(
        "<div class=\"ids\">USER ID: {} | MESSAGE ID: {}</div>\n",
        escape_html(&message.author.id),
        escape_html(&message.id)
    ));
    out.push_str("<div class=\"content\">");
    out.push_str(&render_message(&message.content));
    out.push_str("</div>\n");
    for attachment in &message.attachments {
        render_attachment(out, attachment);
    }
    out.push_str("</div>\n");
}

pub fn render_html(
    messages: &[Message],
    header: &DocumentHeader,
    zone: &ArchiveZone,
    generated_at: &DateTime<Utc>,
) -> String {
    let title = format!("{TOOL_NAME} - {}", header.channel_name);
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    out.push_str("<meta charset=\"UTF-8\">\n");
    out.push_str(
        "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    out.push_str(&format!("<title>{}</title>\n", escape_html(&title)));
    out.push_str("<style>\n");
    out.push_str(STYLE);
    out.push_str("</style>\n</head>\n<body>\n");

    out.push_str("<div class=\"header\">\n");
    out.push_str(&format!(
        "<h1>{TOOL_NAME}</h1>\n<div class=\"version\">version {}</div>\n",
        env!("CARGO_PKG_VERSION")
    ));
    out.push_str("<div class=\"info\">\n");
    out.push_str(&format!(
        "<p>Guild: {}</p>\n",
        escape_html(&header.guild_name)
    ));
    out.push_str(&format!(
        "<p>Channel: {}</p>\n",
        escape_html(&header.channel_name)
    ));
    out.push_str(&format!("<p>Timezone: {}</p>\n", escape_html(&zone.label())));
    if let Some(user) = &header.filtered_for {
        out.push_str(&format!(
            "<p>Filtered for user: {}</p>\n",
            escape_html(user)
        ));
    }
    out.push_str(&format!(
        "<p>Generated: {}</p>\n",
        escape_html(&zone.display(generated_at))
    ));
    out.push_str("</div>\n</div>\n");

    for message in messages {
        render_message_block(&mut out, message, zone);
    }

    out.push_str("</body>\n</html>\n");
    out
}

/// Picks `<stamp>` or the first free `<stamp>-N` so an earlier snapshot in
/// the same second is never overwritten.
pub fn reserve_stem(channel_dir: &Path, stamp: &str) -> String {
    let taken = |stem: &str| {
        channel_dir.join(format!("{stem}.json")).exists()
            || channel_dir.join(format!("{stem}.html")).exists()
    };
    if !taken(stamp) {
        return stamp.to_string();
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{stamp}-{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

pub fn write_documents(
    channel_dir: &Path,
    messages: &[Message],
    header: &DocumentHeader,
    zone: &ArchiveZone,
    generated_at: &DateTime<Utc>,
) -> Result<DocumentPaths> {
    let stem = reserve_stem(channel_dir, &zone.file_stamp(generated_at));
    let json_path = channel_dir.join(format!("{stem}.json"));
    let html_path = channel_dir.join(format!("{stem}.html"));

    let record = render_record(messages)?;
    fs::write(&json_path, format!("{record}\n"))
        .map_err(|err| ArchiveError::storage(&json_path, err))?;

    let html = render_html(messages, header, zone, generated_at);
    fs::write(&html_path, html).map_err(|err| ArchiveError::storage(&html_path, err))?;

    Ok(DocumentPaths {
        stem,
        json_path,
        html_path,
    })
}

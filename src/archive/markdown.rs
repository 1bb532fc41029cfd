//! Chat-flavoured markdown rendering.
//!
//! Uses comrak for CommonMark parsing. Chat emphasis (`**bold**`, `*italic*`,
//! `__underline__`, `~~strike~~`) is part of the parser's inline grammar, so
//! there is no second pass over generated HTML. Raw HTML in messages and the
//! bodies of code spans/blocks always come out escaped.

use comrak::{Options, markdown_to_html};

fn chat_options() -> Options<'static> {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.underline = true;
    options.extension.autolink = true;
    options.extension.table = true;
    options.render.hardbreaks = true;
    options.render.escape = true;
    options
}

pub fn render_message(content: &str) -> String {
    if content.trim().is_empty() {
        return String::new();
    }
    markdown_to_html(content, &chat_options())
}

/// Escapes text for HTML element content and double-quoted attributes.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

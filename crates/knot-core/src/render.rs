//! Markdown → HTML for notes, plus the human-readable save status line.

use crate::link_parser::{extract_link_tokens, render_links, LinkFormat};
use crate::note::{LastModified, Note, SAVING};
use chrono::{DateTime, Utc};
use pulldown_cmark::{html, Options, Parser};
use std::sync::LazyLock;

pub const FAILED_STATUS_TEXT: &str = "failed to save, please refresh.";

/// Allow-list applied to every rendered note. Task-list checkboxes survive;
/// links keep relative hrefs and get no `rel`.
static SANITIZER: LazyLock<ammonia::Builder<'static>> = LazyLock::new(|| {
    let mut builder = ammonia::Builder::default();
    builder
        .link_rel(None)
        .add_tags(&["input"])
        .add_tag_attributes("input", &["type", "checked", "disabled"]);
    builder
});

/// Strip anything outside the allow-list from rendered HTML.
pub fn sanitize_html(html: &str) -> String {
    SANITIZER.clean(html).to_string()
}

/// Turns markdown into HTML. Swappable so clients can plug in their own renderer.
pub trait MarkdownConverter: Send + Sync {
    fn to_html(&self, markdown: &str) -> String;
}

/// CommonMark with tables, strikethrough and task lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct PulldownConverter;

impl MarkdownConverter for PulldownConverter {
    fn to_html(&self, markdown: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);

        let parser = Parser::new_ext(markdown, options);
        let mut body = String::new();
        html::push_html(&mut body, parser);
        body
    }
}

/// Render a note's content: wiki links become markdown links in `format`,
/// escaped ones become literal text, then the whole thing goes to `converter`
/// and the result is sanitized.
pub fn render_note_html<M>(note: &Note, converter: &M, format: LinkFormat) -> String
where
    M: MarkdownConverter + ?Sized,
{
    render_markdown_html(&note.content, converter, format)
}

pub fn render_markdown_html<M>(content: &str, converter: &M, format: LinkFormat) -> String
where
    M: MarkdownConverter + ?Sized,
{
    let tokens = extract_link_tokens(content);
    let markdown = render_links(content, &tokens, |name| format.format(name));
    sanitize_html(&converter.to_html(&markdown))
}

/// Status line shown next to the editor.
pub fn describe_last_modified(last_modified: &LastModified, now: DateTime<Utc>) -> String {
    let at = match last_modified {
        LastModified::Saving => return SAVING.to_string(),
        LastModified::FailedToSave => return FAILED_STATUS_TEXT.to_string(),
        LastModified::At(at) => *at,
    };

    let elapsed = (now - at).num_seconds().unsigned_abs();
    let days = elapsed / 86_400;
    let hours = (elapsed % 86_400) / 3_600;
    let minutes = (elapsed % 3_600) / 60;

    if days >= 1 {
        format!("edited: {} days ago", days)
    } else if hours >= 1 {
        format!("edited: {} hours ago", hours)
    } else {
        format!("edited: {} minutes ago", minutes)
    }
}

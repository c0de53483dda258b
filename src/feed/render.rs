//! Display renderings of article markup.
//!
//! Feeds carry HTML in their descriptions. The list view wants a single line
//! of plain text; the preview wants a lightweight Markdown document.

use html_escape::decode_html_entities;

use crate::storage::Article;
use crate::util::strip_control_chars;

/// Wrap width for the Markdown body
const MARKDOWN_WIDTH: usize = 80;

/// Strip HTML tags, decode entities and collapse whitespace.
///
/// The result is a single line with terminal control characters removed,
/// suitable for a list item description.
pub fn html_to_text(html: &str) -> String {
    let mut stripped = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut chars = html.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            // A bare '<' in text ("a < b") is not a tag
            '<' if !in_tag
                && chars
                    .peek()
                    .is_some_and(|&n| n.is_ascii_alphabetic() || n == '/' || n == '!') =>
            {
                in_tag = true
            }
            '>' if in_tag => {
                in_tag = false;
                // Tags separate words ("a<br>b" is two words)
                stripped.push(' ');
            }
            _ if !in_tag => stripped.push(c),
            _ => {}
        }
    }

    let decoded = decode_html_entities(&stripped);
    let clean = strip_control_chars(&decoded);
    clean.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render an article as a Markdown document.
///
/// The body comes from the article content when present, otherwise from the
/// description. The publication date is omitted when the feed had none.
pub fn markdownize(article: &Article) -> String {
    let mut doc = String::new();

    let title = strip_control_chars(article.title.trim());
    if !title.is_empty() {
        doc.push_str("# ");
        doc.push_str(&title);
        doc.push_str("\n\n");
    }

    if article.published.timestamp() != 0 {
        doc.push_str(&format!(
            "*{}*\n\n",
            article.published.format("%Y-%m-%d %H:%M UTC")
        ));
    }

    let source = if article.content.trim().is_empty() {
        &article.description
    } else {
        &article.content
    };
    let body = html2text::from_read(source.as_bytes(), MARKDOWN_WIDTH);
    let body = strip_control_chars(body.trim());
    if !body.is_empty() {
        doc.push_str(&body);
        doc.push_str("\n\n");
    }

    let link = article.link.trim();
    if !link.is_empty() {
        doc.push_str(&format!("[Read more]({})\n", link));
    }

    doc.trim_end().to_string()
}

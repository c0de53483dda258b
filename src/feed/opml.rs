use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::storage::{write_atomic, Category, Feed, PersistError};
use crate::util::validate_feed_url;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// SEC-014: Maximum OPML file size accepted for import (5 MB).
const MAX_OPML_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Category receiving feeds that are not inside any folder outline
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Errors that can occur during OPML import and export.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing or writing failed.
    #[error("XML error: {0}")]
    Xml(String),

    /// File I/O error.
    #[error("Failed to access OPML file: {0}")]
    Io(#[from] std::io::Error),

    #[error("OPML file too large ({0} bytes)")]
    TooLarge(u64),

    /// Writing the exported document failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl From<quick_xml::Error> for OpmlError {
    fn from(e: quick_xml::Error) -> Self {
        OpmlError::Xml(e.to_string())
    }
}

/// Attributes of one `<outline>` element that we care about.
#[derive(Default)]
struct Outline {
    title: Option<String>,
    text: Option<String>,
    description: Option<String>,
    xml_url: Option<String>,
}

/// What one reader event means for the outline walk
enum Step {
    Open(BytesStart<'static>, bool),
    Close,
    Skip,
}

/// Reads an OPML file and returns its folders as categories.
pub async fn import_file(path: &Path) -> Result<Vec<Category>, OpmlError> {
    let meta = tokio::fs::metadata(path).await?;
    if meta.len() > MAX_OPML_FILE_SIZE {
        return Err(OpmlError::TooLarge(meta.len()));
    }
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml(&content)
}

/// Parses OPML content into categories.
///
/// Folder outlines (no `xmlUrl`) become categories; feed outlines become
/// feeds of the nearest enclosing folder. Feeds outside any folder are
/// collected in an [`UNCATEGORIZED`] category. Feeds with unusable URLs are
/// skipped with a warning.
///
/// XXE: quick-xml (0.37) never expands `<!ENTITY>` declarations; only the
/// five XML builtins are resolved by `decode_and_unescape_value()`.
pub fn parse_opml(content: &str) -> Result<Vec<Category>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut categories: Vec<Category> = Vec::new();
    // One slot per open <outline>: the category index if it is a folder
    let mut open: Vec<Option<usize>> = Vec::new();
    let mut buf = Vec::new();

    loop {
        let step = match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                Step::Open(e.into_owned(), false)
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                Step::Open(e.into_owned(), true)
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => Step::Close,
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::Xml(e.to_string())),
            _ => Step::Skip,
        };
        buf.clear();

        let (element, self_closing) = match step {
            Step::Open(element, self_closing) => (element, self_closing),
            Step::Close => {
                open.pop();
                continue;
            }
            Step::Skip => continue,
        };

        if !self_closing && open.len() >= MAX_OPML_DEPTH {
            return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
        }

        let outline = read_outline(&element, &reader);
        let slot = match outline.xml_url {
            Some(url) => {
                let name = outline
                    .title
                    .or(outline.text)
                    .unwrap_or_else(|| url.clone());
                match validate_feed_url(&url) {
                    Ok(_) => {
                        let parent = open.iter().rev().find_map(|slot| *slot);
                        let idx = match parent {
                            Some(idx) => idx,
                            None => uncategorized_index(&mut categories),
                        };
                        categories[idx].feeds.push(Feed { name, url });
                    }
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
                    }
                }
                None
            }
            None => {
                let name = outline
                    .title
                    .or(outline.text)
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| UNCATEGORIZED.to_string());
                categories.push(Category {
                    name,
                    description: outline.description.unwrap_or_default(),
                    feeds: Vec::new(),
                });
                Some(categories.len() - 1)
            }
        };

        if !self_closing {
            open.push(slot);
        }
    }

    Ok(categories)
}

fn uncategorized_index(categories: &mut Vec<Category>) -> usize {
    if let Some(idx) = categories.iter().position(|c| c.name == UNCATEGORIZED) {
        return idx;
    }
    categories.push(Category {
        name: UNCATEGORIZED.to_string(),
        description: String::new(),
        feeds: Vec::new(),
    });
    categories.len() - 1
}

fn read_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Outline {
    let mut outline = Outline::default();
    let decoder = reader.decoder();

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = match attr.decode_and_unescape_value(decoder) {
            Ok(value) => value.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable OPML attribute");
                continue;
            }
        };
        match attr.key.as_ref() {
            b"xmlUrl" => outline.xml_url = Some(value),
            b"title" => outline.title = Some(value),
            b"text" => outline.text = Some(value),
            b"description" => outline.description = Some(value),
            _ => {}
        }
    }

    outline
}

/// Exports categories as an OPML 2.0 document.
///
/// Each category is a folder outline carrying its description; each feed is
/// a nested `type="rss"` outline.
pub fn export_opml(categories: &[Category]) -> Result<String, OpmlError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(opml))?;

    writer.write_event(Event::Start(BytesStart::new("head")))?;
    writer.write_event(Event::Start(BytesStart::new("title")))?;
    writer.write_event(Event::Text(BytesText::new("feedstash subscriptions")))?;
    writer.write_event(Event::End(BytesEnd::new("title")))?;
    writer.write_event(Event::End(BytesEnd::new("head")))?;

    writer.write_event(Event::Start(BytesStart::new("body")))?;

    for category in categories {
        let mut folder = BytesStart::new("outline");
        folder.push_attribute(("text", category.name.as_str()));
        folder.push_attribute(("title", category.name.as_str()));
        if !category.description.is_empty() {
            folder.push_attribute(("description", category.description.as_str()));
        }

        if category.feeds.is_empty() {
            writer.write_event(Event::Empty(folder))?;
            continue;
        }

        writer.write_event(Event::Start(folder))?;
        for feed in &category.feeds {
            let mut outline = BytesStart::new("outline");
            outline.push_attribute(("type", "rss"));
            outline.push_attribute(("text", feed.name.as_str()));
            outline.push_attribute(("title", feed.name.as_str()));
            outline.push_attribute(("xmlUrl", feed.url.as_str()));
            writer.write_event(Event::Empty(outline))?;
        }
        writer.write_event(Event::End(BytesEnd::new("outline")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("body")))?;
    writer.write_event(Event::End(BytesEnd::new("opml")))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| OpmlError::Xml(e.to_string()))
}

/// Exports categories to an OPML file atomically.
pub async fn export_to_file(categories: &[Category], path: &Path) -> Result<(), OpmlError> {
    let content = export_opml(categories)?;
    write_atomic(path, content.as_bytes()).await?;
    tracing::info!(path = %path.display(), categories = categories.len(), "Exported OPML");
    Ok(())
}

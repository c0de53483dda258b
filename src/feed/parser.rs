use chrono::{DateTime, Utc};
use feed_rs::parser;

use crate::feed::fetcher::FetchError;
use crate::storage::Article;

/// Parse RSS, Atom or JSON Feed bytes into articles, in feed order.
///
/// Missing optional fields never fail the parse: titles, descriptions,
/// content and links default to empty strings and a missing date to the
/// Unix epoch. Descriptions keep their raw markup.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<Article>, FetchError> {
    let feed = parser::parse(bytes).map_err(|e| FetchError::Parse(e.to_string()))?;

    let articles = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let published = entry
                .published
                .or(entry.updated)
                .unwrap_or_else(DateTime::<Utc>::default);
            let content = entry.content.and_then(|c| c.body).unwrap_or_default();
            let description = entry.summary.map(|s| s.content).unwrap_or_default();
            let title = entry.title.map(|t| t.content).unwrap_or_default();

            Article {
                title,
                description,
                published,
                content,
                link,
            }
        })
        .collect();

    Ok(articles)
}

//! Feed retrieval, parsing and rendering.
//!
//! - [`Fetcher`] / [`HttpFetcher`] - fetch a feed URL and parse it into articles
//! - [`parse_feed`] - RSS, Atom and JSON Feed parsing via `feed-rs`
//! - [`render`] - plain-text and Markdown renderings of article markup
//! - [`opml`] - OPML subscription import and export

mod fetcher;
pub mod opml;
mod parser;
pub mod render;

pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use parser::parse_feed;

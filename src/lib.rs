//! Data layer of a terminal feed reader.
//!
//! Maps human-chosen category and feed names to feed URLs ([`storage::Directory`]),
//! keeps parsed articles in an on-disk cache ([`storage::ArticleCache`]) and
//! answers UI queries as lists of display items ([`backend::Backend`]).

pub mod backend;
pub mod config;
pub mod feed;
pub mod storage;
pub mod util;

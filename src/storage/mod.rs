//! Local persistence for the feed directory and the article cache.
//!
//! Both stores live in plain files (TOML for the directory, JSON for the
//! cache) and are written atomically on save.

mod cache;
mod directory;
mod persist;
mod types;

pub use cache::{ArticleCache, CacheSettings, DEFAULT_FETCH_TIMEOUT, DEFAULT_STALE_AFTER};
pub use directory::Directory;
pub(crate) use persist::{read_store_file, write_atomic};
pub use types::{
    Article, CacheEntry, CacheStats, Category, DirectoryError, Feed, FeedRef, LoadOutcome,
    PersistError,
};

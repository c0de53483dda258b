use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Lookup and mutation errors for the feed directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No category matches the requested name exactly
    #[error("Category not found: {0}")]
    CategoryNotFound(String),

    /// No feed matches the requested name
    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    /// SEC-014: Name is blank or carries terminal control characters
    #[error("Name cannot be blank or contain control characters")]
    InvalidName,

    /// Feed URL did not pass validation
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
}

/// Errors raised while reading or writing one of the on-disk stores.
///
/// A missing file is not an error: loaders report it as
/// [`LoadOutcome::Missing`] and start empty.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but its content is malformed
    #[error("Malformed file '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Failed to serialize store: {0}")]
    Serialize(String),

    /// SEC-014: File exceeds the maximum size we are willing to read
    #[error("File '{}' is too large ({size} bytes, max {max})", path.display())]
    TooLarge { path: PathBuf, size: u64, max: u64 },
}

// ============================================================================
// Load Outcome
// ============================================================================

/// What a store load actually did.
///
/// Corrupt files are reported as [`PersistError`] instead, so the caller
/// decides whether starting empty is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// File existed and was parsed
    Loaded,
    /// File did not exist; the store starts empty
    Missing,
    /// File was discarded on request (cache reset); the store starts empty
    Reset,
    /// File could not be parsed and was ignored; the store starts empty and
    /// the file is overwritten at the next save
    Discarded,
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscription inside a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub name: String,
    pub url: String,
}

/// A named grouping of feeds, the top level of the navigation hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub feeds: Vec<Feed>,
}

/// Reference to a feed, optionally scoped to its category.
///
/// A name-only reference resolves to the first feed with that name in
/// directory order. A scoped reference only looks inside the named category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedRef {
    pub category: Option<String>,
    pub name: String,
}

impl FeedRef {
    pub fn in_category(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            name: name.into(),
        }
    }
}

impl From<&str> for FeedRef {
    fn from(name: &str) -> Self {
        Self {
            category: None,
            name: name.to_string(),
        }
    }
}

impl From<String> for FeedRef {
    fn from(name: String) -> Self {
        Self {
            category: None,
            name,
        }
    }
}

impl std::fmt::Display for FeedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.category {
            Some(category) => write!(f, "{}/{}", category, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// One syndicated item parsed from a feed.
///
/// `description` and `content` keep the raw markup from the feed; rendering
/// happens at display time. Missing fields are empty strings and a missing
/// date is the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub published: DateTime<Utc>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub link: String,
}

/// The most recent parsed fetch of a single feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub articles: Vec<Article>,
    pub fetched_at: DateTime<Utc>,
}

/// Aggregate article cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub articles: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

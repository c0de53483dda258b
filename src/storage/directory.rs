use serde::{Deserialize, Serialize};
use std::path::Path;

use super::persist::{read_store_file, write_atomic};
use super::types::{Category, DirectoryError, Feed, FeedRef, LoadOutcome, PersistError};
use crate::util::{strip_control_chars, validate_feed_url};

/// SEC-014: Maximum directory file size (1 MB).
const MAX_DIRECTORY_FILE_SIZE: u64 = 1_048_576;

/// On-disk layout of the directory file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    categories: Vec<Category>,
}

/// The category → feed → URL registry.
///
/// Categories keep insertion order. Duplicate category names, and duplicate
/// feed names within a category, are allowed to coexist: every lookup and
/// mutation targets the first match in directory order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    categories: Vec<Category>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_categories(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    /// SEC-014: Validate a category or feed name given by the caller.
    ///
    /// Names are lookup keys, so they are stored exactly as given. A name
    /// carrying terminal control characters or made only of whitespace is
    /// rejected instead of being rewritten.
    fn check_name(name: &str) -> Result<String, DirectoryError> {
        if name.trim().is_empty() || strip_control_chars(name) != name {
            return Err(DirectoryError::InvalidName);
        }
        Ok(name.to_owned())
    }

    /// SEC-014: Clean a name read from an imported file.
    ///
    /// Strips control characters (ANSI escape injection prevention), trims
    /// whitespace, and rejects empty/whitespace-only names.
    fn sanitize_imported_name(name: &str) -> Result<String, DirectoryError> {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            return Err(DirectoryError::InvalidName);
        }
        Ok(trimmed.to_owned())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All categories in insertion order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Feeds of the first category named exactly `category`.
    pub fn feeds(&self, category: &str) -> Result<&[Feed], DirectoryError> {
        self.category(category)
            .map(|c| c.feeds.as_slice())
            .ok_or_else(|| DirectoryError::CategoryNotFound(category.to_string()))
    }

    /// URL of the first feed named `feed_name` in directory order.
    ///
    /// Feeds sharing a name across categories are not reported as
    /// ambiguous; use [`Directory::resolve`] with a scoped [`FeedRef`] to
    /// pick a specific one.
    pub fn resolve_url(&self, feed_name: &str) -> Result<&str, DirectoryError> {
        self.categories
            .iter()
            .flat_map(|c| c.feeds.iter())
            .find(|f| f.name == feed_name)
            .map(|f| f.url.as_str())
            .ok_or_else(|| DirectoryError::FeedNotFound(feed_name.to_string()))
    }

    /// Resolve a feed reference, scoped to its category when it has one.
    pub fn resolve(&self, feed: &FeedRef) -> Result<&str, DirectoryError> {
        match &feed.category {
            None => self.resolve_url(&feed.name),
            Some(category) => self
                .feeds(category)?
                .iter()
                .find(|f| f.name == feed.name)
                .map(|f| f.url.as_str())
                .ok_or_else(|| DirectoryError::FeedNotFound(feed.to_string())),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a category. An existing category with the same name is kept.
    pub fn add_category(&mut self, name: &str, description: &str) -> Result<(), DirectoryError> {
        let name = Self::check_name(name)?;
        let description = strip_control_chars(description).trim().to_owned();
        self.categories.push(Category {
            name,
            description,
            feeds: Vec::new(),
        });
        Ok(())
    }

    /// Append a feed to the first category named `category`.
    ///
    /// The URL is stored as given, minus surrounding whitespace; the parsed
    /// form only serves validation.
    pub fn add_feed(&mut self, category: &str, name: &str, url: &str) -> Result<(), DirectoryError> {
        let name = Self::check_name(name)?;
        let url = url.trim();
        validate_feed_url(url).map_err(|e| DirectoryError::InvalidUrl(e.to_string()))?;

        let target = self
            .categories
            .iter_mut()
            .find(|c| c.name == category)
            .ok_or_else(|| DirectoryError::CategoryNotFound(category.to_string()))?;
        target.feeds.push(Feed {
            name,
            url: url.to_owned(),
        });
        Ok(())
    }

    /// Remove the first category named `name` together with its feeds.
    ///
    /// Returns `false` (not an error) when there was nothing to remove.
    pub fn delete_category(&mut self, name: &str) -> bool {
        match self.categories.iter().position(|c| c.name == name) {
            Some(idx) => {
                self.categories.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove the first feed named `name` from the first category named
    /// `category`. Unknown category or feed is a no-op.
    pub fn delete_feed(&mut self, category: &str, name: &str) -> bool {
        let Some(target) = self.categories.iter_mut().find(|c| c.name == category) else {
            return false;
        };
        match target.feeds.iter().position(|f| f.name == name) {
            Some(idx) => {
                target.feeds.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Merge imported categories into the directory.
    ///
    /// Imported categories fold into the first existing category of the same
    /// name. A feed whose name and URL both match one already in that
    /// category is skipped, so importing the same file twice adds nothing.
    /// Entries with names that sanitize to nothing are dropped.
    ///
    /// Returns the number of feeds added.
    pub fn merge(&mut self, imported: Vec<Category>) -> usize {
        let mut added = 0;

        for category in imported {
            let Ok(name) = Self::sanitize_imported_name(&category.name) else {
                tracing::warn!("Skipping imported category with an empty name");
                continue;
            };
            let idx = match self.categories.iter().position(|c| c.name == name) {
                Some(idx) => idx,
                None => {
                    self.categories.push(Category {
                        name,
                        description: strip_control_chars(&category.description)
                            .trim()
                            .to_owned(),
                        feeds: Vec::new(),
                    });
                    self.categories.len() - 1
                }
            };

            let target = &mut self.categories[idx];
            for feed in category.feeds {
                let Ok(feed_name) = Self::sanitize_imported_name(&feed.name) else {
                    tracing::warn!(url = %feed.url, "Skipping imported feed with an empty name");
                    continue;
                };
                let exists = target
                    .feeds
                    .iter()
                    .any(|f| f.name == feed_name && f.url == feed.url);
                if !exists {
                    target.feeds.push(Feed {
                        name: feed_name,
                        url: feed.url,
                    });
                    added += 1;
                }
            }
        }

        added
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Load the directory from a TOML file.
    ///
    /// - Missing file → empty directory, [`LoadOutcome::Missing`]
    /// - Empty file → empty directory, [`LoadOutcome::Loaded`]
    /// - Invalid TOML → [`PersistError::Parse`]
    pub async fn load(path: &Path) -> Result<(Self, LoadOutcome), PersistError> {
        let Some(content) = read_store_file(path, MAX_DIRECTORY_FILE_SIZE).await? else {
            tracing::info!(path = %path.display(), "No feed directory found, starting empty");
            return Ok((Self::new(), LoadOutcome::Missing));
        };

        let file: DirectoryFile = if content.trim().is_empty() {
            DirectoryFile::default()
        } else {
            toml::from_str(&content).map_err(|e| PersistError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        let directory = Self::from_categories(file.categories);
        tracing::info!(
            path = %path.display(),
            categories = directory.categories.len(),
            "Loaded feed directory"
        );
        Ok((directory, LoadOutcome::Loaded))
    }

    /// Serialize the directory to its TOML representation.
    pub fn to_toml(&self) -> Result<String, PersistError> {
        let file = DirectoryFile {
            categories: self.categories.clone(),
        };
        toml::to_string_pretty(&file).map_err(|e| PersistError::Serialize(e.to_string()))
    }

    /// Atomically write the whole directory to `path`.
    pub async fn save(&self, path: &Path) -> Result<(), PersistError> {
        let content = self.to_toml()?;
        write_atomic(path, content.as_bytes()).await?;
        tracing::info!(
            path = %path.display(),
            categories = self.categories.len(),
            "Saved feed directory"
        );
        Ok(())
    }
}

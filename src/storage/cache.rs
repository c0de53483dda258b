use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::persist::{read_store_file, remove_store_file, write_atomic};
use super::types::{Article, CacheEntry, CacheStats, LoadOutcome, PersistError};
use crate::feed::{FetchError, Fetcher};

/// SEC-014: Maximum cache file size (64 MB).
const MAX_CACHE_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Cache file format version
const CACHE_FILE_VERSION: u32 = 1;

/// Default age after which an entry is refreshed (30 minutes)
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

/// Default bound on a single feed fetch (20 seconds)
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// On-disk layout of the cache file. Keys are sorted so the file diffs cleanly.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
}

/// Tunables for the article cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// Entries older than this are refreshed before being served
    pub stale_after: Duration,
    /// Upper bound on a single fetch; a timeout counts as a fetch failure
    pub fetch_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// Per-URL refresh state. Holding `last_error` is what serializes fetches.
#[derive(Default)]
struct RefreshSlot {
    /// Fetch attempts finished for this URL
    finished: AtomicU64,
    /// Error of the latest attempt, `None` when it succeeded
    last_error: Mutex<Option<FetchError>>,
}

/// URL → parsed articles store with staleness-based refresh.
///
/// Concurrent refreshes of the same URL are serialized by a per-URL slot so
/// only one fetch is in flight per URL. Requests that queued behind a fetch
/// take its outcome instead of fetching again, whether it succeeded or not.
/// The entries map itself is only locked for lookups, replacement and
/// serialization, never across a fetch.
pub struct ArticleCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, Arc<RefreshSlot>>>,
    fetcher: Arc<dyn Fetcher>,
    settings: CacheSettings,
}

impl ArticleCache {
    pub fn new(fetcher: Arc<dyn Fetcher>, settings: CacheSettings) -> Self {
        Self::with_entries(Vec::new(), fetcher, settings)
    }

    /// Build a cache pre-populated with `entries`. Later entries for the same
    /// URL replace earlier ones.
    pub fn with_entries(
        entries: impl IntoIterator<Item = CacheEntry>,
        fetcher: Arc<dyn Fetcher>,
        settings: CacheSettings,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.url.clone(), entry))
            .collect();
        Self {
            entries: Mutex::new(entries),
            in_flight: Mutex::new(HashMap::new()),
            fetcher,
            settings,
        }
    }

    fn is_stale(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        // A clock that went backwards yields a negative age; treat it as fresh
        let age = (now - entry.fetched_at).to_std().unwrap_or(Duration::ZERO);
        age >= self.settings.stale_after
    }

    /// Returns the fresh entry for `url`, if any.
    async fn fresh_articles(&self, url: &str) -> Option<Vec<Article>> {
        let entries = self.entries.lock().await;
        entries
            .get(url)
            .filter(|entry| !self.is_stale(entry, Utc::now()))
            .map(|entry| entry.articles.clone())
    }

    async fn refresh_slot(&self, url: &str) -> Arc<RefreshSlot> {
        let mut in_flight = self.in_flight.lock().await;
        Arc::clone(in_flight.entry(url.to_string()).or_default())
    }

    /// Articles for `url`, from cache when fresh, otherwise fetched.
    ///
    /// # Errors
    ///
    /// Returns the [`FetchError`] only when the fetch failed and there is no
    /// previous entry to fall back to. With a previous entry, the stale
    /// articles are returned instead.
    pub async fn get_articles(&self, url: &str) -> Result<Vec<Article>, FetchError> {
        if let Some(articles) = self.fresh_articles(url).await {
            tracing::debug!(url = %url, "Serving articles from cache");
            return Ok(articles);
        }

        let slot = self.refresh_slot(url).await;
        let seen = slot.finished.load(Ordering::Acquire);
        let mut last_error = slot.last_error.lock().await;

        // Another task may have refreshed the entry while we waited
        if let Some(articles) = self.fresh_articles(url).await {
            tracing::debug!(url = %url, "Entry refreshed by concurrent request");
            return Ok(articles);
        }

        // An attempt finished while we waited and failed: share its outcome
        if slot.finished.load(Ordering::Acquire) != seen {
            if let Some(error) = last_error.clone() {
                tracing::debug!(url = %url, "Concurrent refresh failed, not refetching");
                return self.stale_or(url, error).await;
            }
        }

        let fetched = match tokio::time::timeout(self.settings.fetch_timeout, self.fetcher.fetch(url))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    url = %url,
                    timeout_secs = self.settings.fetch_timeout.as_secs_f64(),
                    "Feed fetch timed out"
                );
                Err(FetchError::Timeout)
            }
        };

        let result = match fetched {
            Ok(articles) => {
                tracing::info!(url = %url, articles = articles.len(), "Refreshed feed");
                self.entries.lock().await.insert(
                    url.to_string(),
                    CacheEntry {
                        url: url.to_string(),
                        articles: articles.clone(),
                        fetched_at: Utc::now(),
                    },
                );
                *last_error = None;
                Ok(articles)
            }
            Err(e) => {
                *last_error = Some(e.clone());
                self.stale_or(url, e).await
            }
        };
        // Published before the slot is released
        slot.finished.fetch_add(1, Ordering::Release);
        result
    }

    /// The previous articles for `url` after a failed fetch, or the error.
    async fn stale_or(&self, url: &str, error: FetchError) -> Result<Vec<Article>, FetchError> {
        let entries = self.entries.lock().await;
        match entries.get(url) {
            Some(stale) => {
                tracing::warn!(
                    url = %url,
                    error = %error,
                    fetched_at = %stale.fetched_at,
                    "Fetch failed, serving stale articles"
                );
                Ok(stale.articles.clone())
            }
            None => Err(error),
        }
    }

    /// Snapshot of every entry, ordered by URL.
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let entries = self.entries.lock().await;
        let mut snapshot: Vec<CacheEntry> = entries.values().cloned().collect();
        snapshot.sort_by(|a, b| a.url.cmp(&b.url));
        snapshot
    }

    /// Drop entries fetched more than `max_age` ago.
    ///
    /// Returns the number of entries evicted.
    pub async fn evict_expired(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| {
            (now - entry.fetched_at)
                .to_std()
                .map(|age| age <= max_age)
                .unwrap_or(true)
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::info!(evicted = evicted, "Evicted expired cache entries");
        }
        evicted
    }

    /// Aggregate statistics over the current entries.
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        CacheStats {
            entries: entries.len(),
            articles: entries.values().map(|e| e.articles.len()).sum(),
            oldest: entries.values().map(|e| e.fetched_at).min(),
            newest: entries.values().map(|e| e.fetched_at).max(),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Load the cache from a JSON file.
    ///
    /// - Missing file → empty cache, [`LoadOutcome::Missing`]
    /// - Malformed file → [`PersistError::Parse`]; the caller may choose to
    ///   continue with [`ArticleCache::new`]
    pub async fn load(
        path: &Path,
        fetcher: Arc<dyn Fetcher>,
        settings: CacheSettings,
    ) -> Result<(Self, LoadOutcome), PersistError> {
        let Some(content) = read_store_file(path, MAX_CACHE_FILE_SIZE).await? else {
            tracing::info!(path = %path.display(), "No article cache found, starting empty");
            return Ok((Self::new(fetcher, settings), LoadOutcome::Missing));
        };

        let file: CacheFile = serde_json::from_str(&content).map_err(|e| PersistError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if file.version != CACHE_FILE_VERSION {
            return Err(PersistError::Parse {
                path: path.to_path_buf(),
                message: format!(
                    "unsupported cache version {} (expected {})",
                    file.version, CACHE_FILE_VERSION
                ),
            });
        }

        tracing::info!(
            path = %path.display(),
            entries = file.entries.len(),
            "Loaded article cache"
        );
        // Key is authoritative for the URL
        let entries = file.entries.into_iter().map(|(url, mut entry)| {
            entry.url = url;
            entry
        });
        Ok((
            Self::with_entries(entries, fetcher, settings),
            LoadOutcome::Loaded,
        ))
    }

    /// Discard the cache file and start empty.
    pub async fn reset(
        path: &Path,
        fetcher: Arc<dyn Fetcher>,
        settings: CacheSettings,
    ) -> Result<(Self, LoadOutcome), PersistError> {
        remove_store_file(path).await?;
        tracing::info!(path = %path.display(), "Article cache reset");
        Ok((Self::new(fetcher, settings), LoadOutcome::Reset))
    }

    /// Serialize the cache to its JSON representation.
    pub async fn to_json(&self) -> Result<String, PersistError> {
        let entries = self.entries.lock().await;
        let file = CacheFile {
            version: CACHE_FILE_VERSION,
            entries: entries
                .iter()
                .map(|(url, entry)| (url.clone(), entry.clone()))
                .collect(),
        };
        serde_json::to_string_pretty(&file).map_err(|e| PersistError::Serialize(e.to_string()))
    }

    /// Atomically write the whole cache to `path`.
    pub async fn save(&self, path: &Path) -> Result<(), PersistError> {
        let content = self.to_json().await?;
        write_atomic(path, content.as_bytes()).await?;
        tracing::info!(path = %path.display(), "Saved article cache");
        Ok(())
    }
}

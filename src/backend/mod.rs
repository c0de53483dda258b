//! Resolution backend: turns category and feed names into display items.
//!
//! The backend owns the [`Directory`] and the [`ArticleCache`] for the
//! session. UI code issues `fetch_*` commands, which run as tokio tasks and
//! answer with exactly one [`BackendEvent`] on the channel given at
//! construction. Results arrive in completion order and carry their
//! [`Request`] for correlation.
//!
//! Both stores are loaded once by [`Backend::open`] and written back once by
//! [`Backend::close`]. Mutations in between stay in memory.

mod task;
mod types;

pub use types::{BackendError, BackendEvent, ItemKey, ItemKind, ListItem, NewItem, Request};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::feed::render::{html_to_text, markdownize};
use crate::feed::{opml, Fetcher};
use crate::storage::{
    Article, ArticleCache, CacheSettings, CacheStats, Category, Directory, FeedRef, LoadOutcome,
    PersistError,
};
use crate::util::strip_control_chars;
use task::catch_task_panic;

/// Failure description for an unknown category
pub const ERR_GET_FEEDS: &str = "Failed to get feeds";
/// Failure description for a feed name that resolves to no URL
pub const ERR_ARTICLE_URL: &str = "Failed to get the article url";
/// Failure description for a fetch or parse failure with no cached fallback
pub const ERR_PARSE_ARTICLE: &str = "Failed to parse the article";
/// Failure description for a command whose task panicked
pub const ERR_TASK_PANICKED: &str = "Background task failed";

/// Cache entries older than this are dropped at close (7 days)
pub const DEFAULT_CACHE_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// What [`Backend::open`] does with a cache file it cannot parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorruptCache {
    /// Refuse to open
    #[default]
    Fail,
    /// Log it and start with an empty cache ([`LoadOutcome::Discarded`])
    StartEmpty,
}

/// Where the backend keeps its files and how the cache behaves.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub feeds_path: PathBuf,
    pub cache_path: PathBuf,
    /// Discard the cache file instead of loading it
    pub reset_cache: bool,
    pub on_corrupt_cache: CorruptCache,
    pub cache: CacheSettings,
    pub cache_retention: Duration,
}

impl BackendConfig {
    pub fn new(feeds_path: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            feeds_path: feeds_path.into(),
            cache_path: cache_path.into(),
            reset_cache: false,
            on_corrupt_cache: CorruptCache::default(),
            cache: CacheSettings::default(),
            cache_retention: DEFAULT_CACHE_RETENTION,
        }
    }
}

/// What [`Backend::open`] found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Startup {
    pub directory: LoadOutcome,
    pub cache: LoadOutcome,
}

/// Directory and cache counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStats {
    pub categories: usize,
    pub feeds: usize,
    pub cache: CacheStats,
}

type Failure = (&'static str, BackendError);

/// Handle to the session's directory and cache.
///
/// Cloning is cheap; clones share the same stores and event channel.
#[derive(Clone)]
pub struct Backend {
    directory: Arc<RwLock<Directory>>,
    cache: Arc<ArticleCache>,
    events: mpsc::Sender<BackendEvent>,
    feeds_path: PathBuf,
    cache_path: PathBuf,
    cache_retention: Duration,
}

impl Backend {
    /// Load both stores and build the backend.
    ///
    /// Missing files start empty. A directory that cannot be parsed is
    /// always an error, since saving over it would lose the subscriptions.
    /// A corrupt cache follows [`BackendConfig::on_corrupt_cache`].
    pub async fn open(
        config: BackendConfig,
        fetcher: Arc<dyn Fetcher>,
        events: mpsc::Sender<BackendEvent>,
    ) -> Result<(Self, Startup), BackendError> {
        let (directory, directory_outcome) = Directory::load(&config.feeds_path).await?;
        let (cache, cache_outcome) = if config.reset_cache {
            ArticleCache::reset(&config.cache_path, fetcher, config.cache).await?
        } else {
            match ArticleCache::load(&config.cache_path, Arc::clone(&fetcher), config.cache).await
            {
                Ok(loaded) => loaded,
                Err(e @ PersistError::Parse { .. })
                    if config.on_corrupt_cache == CorruptCache::StartEmpty =>
                {
                    tracing::warn!(error = %e, "Article cache is corrupt, starting empty");
                    (
                        ArticleCache::new(fetcher, config.cache),
                        LoadOutcome::Discarded,
                    )
                }
                Err(e) => return Err(e.into()),
            }
        };

        let startup = Startup {
            directory: directory_outcome,
            cache: cache_outcome,
        };
        tracing::debug!(?startup, "Backend opened");
        Ok((Self::from_parts(directory, cache, &config, events), startup))
    }

    pub fn from_parts(
        directory: Directory,
        cache: ArticleCache,
        config: &BackendConfig,
        events: mpsc::Sender<BackendEvent>,
    ) -> Self {
        Self {
            directory: Arc::new(RwLock::new(directory)),
            cache: Arc::new(cache),
            events,
            feeds_path: config.feeds_path.clone(),
            cache_path: config.cache_path.clone(),
            cache_retention: config.cache_retention,
        }
    }

    // ========================================================================
    // Direct queries
    // ========================================================================

    /// Every category, in directory order. Never fails.
    pub async fn categories(&self) -> Vec<ListItem> {
        let directory = self.directory.read().await;
        directory.categories().iter().map(category_item).collect()
    }

    /// Feeds of `category`. The detail line carries the feed URL.
    pub async fn feeds(&self, category: &str) -> Result<Vec<ListItem>, BackendError> {
        let directory = self.directory.read().await;
        let feeds = directory.feeds(category)?;
        Ok(feeds
            .iter()
            .map(|feed| ListItem {
                title: strip_control_chars(&feed.name).into_owned(),
                detail: feed.url.clone(),
                extra: String::new(),
            })
            .collect())
    }

    /// Articles of `feed`, refreshed through the cache when stale.
    pub async fn articles(&self, feed: &FeedRef) -> Result<Vec<ListItem>, BackendError> {
        self.article_items(feed).await.map_err(|(_, error)| error)
    }

    async fn article_items(&self, feed: &FeedRef) -> Result<Vec<ListItem>, Failure> {
        // Release the directory before touching the network
        let url = {
            let directory = self.directory.read().await;
            directory
                .resolve(feed)
                .map(str::to_owned)
                .map_err(|e| (ERR_ARTICLE_URL, e.into()))?
        };

        let articles = self
            .cache
            .get_articles(&url)
            .await
            .map_err(|e| (ERR_PARSE_ARTICLE, e.into()))?;
        Ok(articles.iter().map(article_item).collect())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Spawn a categories query. Always answers with `FetchSucceeded`.
    pub fn fetch_categories(&self) -> JoinHandle<()> {
        let backend = self.clone();
        self.spawn_request("fetch_categories", Request::Categories, async move {
            Ok(backend.categories().await)
        })
    }

    /// Spawn a feeds query for `category`.
    pub fn fetch_feeds(&self, category: impl Into<String>) -> JoinHandle<()> {
        let category = category.into();
        let backend = self.clone();
        let request = Request::Feeds(category.clone());
        self.spawn_request("fetch_feeds", request, async move {
            backend
                .feeds(&category)
                .await
                .map_err(|e| (ERR_GET_FEEDS, e))
        })
    }

    /// Spawn an articles query for `feed`.
    pub fn fetch_articles(&self, feed: impl Into<FeedRef>) -> JoinHandle<()> {
        let feed = feed.into();
        let backend = self.clone();
        let request = Request::Articles(feed.clone());
        self.spawn_request("fetch_articles", request, async move {
            backend.article_items(&feed).await
        })
    }

    fn spawn_request<F>(&self, task: &'static str, request: Request, work: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<Vec<ListItem>, Failure>> + Send + 'static,
    {
        let tx = self.events.clone();
        tokio::spawn(async move {
            let (description, error) = match catch_task_panic(work).await {
                Ok(Ok(items)) => {
                    send_event(&tx, task, BackendEvent::FetchSucceeded { request, items }).await;
                    return;
                }
                Ok(Err((description, error))) => {
                    tracing::warn!(task, ?request, error = %error, "{}", description);
                    (description, error)
                }
                Err(message) => {
                    tracing::error!(task, ?request, error = %message, "Background task panicked");
                    (ERR_TASK_PANICKED, BackendError::TaskPanicked { task, message })
                }
            };
            let event = BackendEvent::FetchFailed {
                request,
                description,
                error,
            };
            send_event(&tx, task, event).await;
        })
    }

    // ========================================================================
    // Directory mutations
    // ========================================================================

    /// Add a category or feed. Persisted at [`Backend::close`].
    pub async fn add_item(&self, item: NewItem) -> Result<(), BackendError> {
        let kind = item.kind();
        let mut directory = self.directory.write().await;
        match item {
            NewItem::Category { name, description } => {
                directory.add_category(&name, &description)?;
            }
            NewItem::Feed {
                category,
                name,
                url,
            } => {
                directory.add_feed(&category, &name, &url)?;
            }
        }
        tracing::info!(?kind, "Added directory item");
        Ok(())
    }

    /// Delete a category or feed. Returns `false` when nothing matched.
    pub async fn delete_item(&self, key: ItemKey) -> bool {
        let kind = key.kind();
        let mut directory = self.directory.write().await;
        let removed = match &key {
            ItemKey::Category(name) => directory.delete_category(name),
            ItemKey::Feed { category, name } => directory.delete_feed(category, name),
        };
        tracing::info!(?kind, removed, "Deleted directory item");
        removed
    }

    /// Merge an OPML file into the directory. Returns the number of feeds added.
    pub async fn import_opml(&self, path: &Path) -> Result<usize, BackendError> {
        let imported = opml::import_file(path).await?;
        let added = self.directory.write().await.merge(imported);
        tracing::info!(path = %path.display(), added, "Imported OPML");
        Ok(added)
    }

    /// Write the directory to `path` as OPML.
    pub async fn export_opml(&self, path: &Path) -> Result<(), BackendError> {
        let categories: Vec<Category> = self.directory.read().await.categories().to_vec();
        opml::export_to_file(&categories, path).await?;
        Ok(())
    }

    pub async fn stats(&self) -> BackendStats {
        let (categories, feeds) = {
            let directory = self.directory.read().await;
            let categories = directory.categories();
            (
                categories.len(),
                categories.iter().map(|c| c.feeds.len()).sum(),
            )
        };
        BackendStats {
            categories,
            feeds,
            cache: self.cache.stats().await,
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Persist both stores.
    ///
    /// Expired cache entries are evicted, then the cache is saved, then the
    /// directory. The directory save runs even if the cache save failed. The
    /// first error is returned and a second one is logged.
    pub async fn close(&self) -> Result<(), BackendError> {
        self.cache.evict_expired(self.cache_retention).await;

        let cache_result = self.cache.save(&self.cache_path).await;
        if let Err(e) = &cache_result {
            tracing::error!(error = %e, "Failed to save article cache");
        }

        let directory_result = {
            let directory = self.directory.read().await;
            directory.save(&self.feeds_path).await
        };
        if let Err(e) = &directory_result {
            tracing::error!(error = %e, "Failed to save feed directory");
        }

        cache_result?;
        directory_result?;
        Ok(())
    }
}

async fn send_event(tx: &mpsc::Sender<BackendEvent>, task: &'static str, event: BackendEvent) {
    if let Err(e) = tx.send(event).await {
        tracing::warn!(error = %e, task, "Channel send failed (receiver dropped)");
    }
}

fn category_item(category: &Category) -> ListItem {
    ListItem {
        title: strip_control_chars(&category.name).into_owned(),
        ..ListItem::default()
    }
}

fn article_item(article: &Article) -> ListItem {
    ListItem {
        title: strip_control_chars(article.title.trim()).into_owned(),
        detail: html_to_text(&article.description),
        extra: markdownize(article),
    }
}

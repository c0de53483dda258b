//! Integration tests for the article cache: refresh, per-URL fetch
//! serialization, timeouts and persistence.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use feedstash::feed::{FetchError, Fetcher};
use feedstash::storage::{Article, ArticleCache, CacheEntry, CacheSettings, LoadOutcome};

const URL: &str = "https://news.example/rss";

fn article(title: &str) -> Article {
    Article {
        title: title.to_string(),
        description: format!("<p>{title}</p>"),
        published: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        content: String::new(),
        link: format!("https://news.example/{title}"),
    }
}

/// How a [`ScriptedFetcher`] answers.
#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    /// Sleep before succeeding
    Slow(Duration),
    /// Sleep before answering 503
    SlowFail(Duration),
    /// Never answer
    Hang,
}

struct ScriptedFetcher {
    calls: AtomicUsize,
    behavior: Behavior,
}

impl ScriptedFetcher {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            behavior,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<Article>, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.behavior {
            Behavior::Succeed => Ok(vec![article(&format!("fetch-{call}"))]),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(vec![article(&format!("fetch-{call}"))])
            }
            Behavior::SlowFail(delay) => {
                tokio::time::sleep(delay).await;
                Err(FetchError::HttpStatus(503))
            }
            Behavior::Hang => std::future::pending().await,
        }
    }
}

fn settings(stale_after: Duration, fetch_timeout: Duration) -> CacheSettings {
    CacheSettings {
        stale_after,
        fetch_timeout,
    }
}

fn entry_aged(age: ChronoDuration, title: &str) -> CacheEntry {
    CacheEntry {
        url: URL.to_string(),
        articles: vec![article(title)],
        fetched_at: Utc::now() - age,
    }
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_stale_entry_is_replaced() {
    let fetcher = ScriptedFetcher::new(Behavior::Succeed);
    let cache = ArticleCache::with_entries(
        vec![entry_aged(ChronoDuration::hours(2), "old")],
        fetcher.clone(),
        CacheSettings::default(),
    );

    let articles = cache.get_articles(URL).await.unwrap();
    assert_eq!(articles[0].title, "fetch-1");

    let entries = cache.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].articles[0].title, "fetch-1");
    assert!(Utc::now() - entries[0].fetched_at < ChronoDuration::minutes(1));

    // Now fresh: no second fetch
    cache.get_articles(URL).await.unwrap();
    assert_eq!(fetcher.calls(), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let fetcher = ScriptedFetcher::new(Behavior::Slow(Duration::from_millis(100)));
    let cache = Arc::new(ArticleCache::new(fetcher.clone(), CacheSettings::default()));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_articles(URL).await })
        })
        .collect();

    for handle in handles {
        let articles = handle.await.unwrap().unwrap();
        assert_eq!(articles[0].title, "fetch-1");
    }
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_on_stale_entry_share_one_fetch() {
    let fetcher = ScriptedFetcher::new(Behavior::Slow(Duration::from_millis(50)));
    let cache = ArticleCache::with_entries(
        vec![entry_aged(ChronoDuration::hours(2), "old")],
        fetcher.clone(),
        CacheSettings::default(),
    );

    let (a, b) = tokio::join!(cache.get_articles(URL), cache.get_articles(URL));
    assert_eq!(a.unwrap()[0].title, "fetch-1");
    assert_eq!(b.unwrap()[0].title, "fetch-1");
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_failed_refresh_is_shared_with_waiters() {
    let fetcher = ScriptedFetcher::new(Behavior::SlowFail(Duration::from_millis(50)));
    let stale = entry_aged(ChronoDuration::hours(2), "old");
    let cache = ArticleCache::with_entries(
        vec![stale.clone()],
        fetcher.clone(),
        CacheSettings::default(),
    );

    let (a, b) = tokio::join!(cache.get_articles(URL), cache.get_articles(URL));
    assert_eq!(a.unwrap(), stale.articles);
    assert_eq!(b.unwrap(), stale.articles);
    assert_eq!(fetcher.calls(), 1);

    // A later request tries the network again
    cache.get_articles(URL).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_failed_fetch_without_entry_is_shared_with_waiters() {
    let fetcher = ScriptedFetcher::new(Behavior::SlowFail(Duration::from_millis(50)));
    let cache = ArticleCache::new(fetcher.clone(), CacheSettings::default());

    let (a, b, c) = tokio::join!(
        cache.get_articles(URL),
        cache.get_articles(URL),
        cache.get_articles(URL)
    );
    for result in [a, b, c] {
        assert!(matches!(result, Err(FetchError::HttpStatus(503))));
    }
    assert_eq!(fetcher.calls(), 1);
    assert!(cache.entries().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_feed_times_out_once_for_all_waiters() {
    let fetcher = ScriptedFetcher::new(Behavior::Hang);
    let cache = ArticleCache::with_entries(
        vec![entry_aged(ChronoDuration::hours(1), "stale")],
        fetcher.clone(),
        settings(Duration::from_secs(60), Duration::from_secs(5)),
    );

    let started = tokio::time::Instant::now();
    let (a, b, c) = tokio::join!(
        cache.get_articles(URL),
        cache.get_articles(URL),
        cache.get_articles(URL)
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(fetcher.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_different_urls_fetch_independently() {
    let fetcher = ScriptedFetcher::new(Behavior::Succeed);
    let cache = ArticleCache::new(fetcher.clone(), CacheSettings::default());

    let (a, b) = tokio::join!(
        cache.get_articles("https://a.example/rss"),
        cache.get_articles("https://b.example/rss")
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(cache.entries().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_releases_url_guard() {
    let fetcher = ScriptedFetcher::new(Behavior::Hang);
    let cache = ArticleCache::new(
        fetcher.clone(),
        settings(Duration::from_secs(60), Duration::from_secs(5)),
    );

    let first = cache.get_articles(URL).await.unwrap_err();
    assert!(matches!(first, FetchError::Timeout));

    // A second request must be able to take the guard and try again
    let second = cache.get_articles(URL).await.unwrap_err();
    assert!(matches!(second, FetchError::Timeout));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_with_entry_serves_stale() {
    let fetcher = ScriptedFetcher::new(Behavior::Hang);
    let stale = entry_aged(ChronoDuration::hours(1), "stale");
    let cache = ArticleCache::with_entries(
        vec![stale.clone()],
        fetcher,
        settings(Duration::from_secs(60), Duration::from_secs(5)),
    );

    assert_eq!(cache.get_articles(URL).await.unwrap(), stale.articles);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_save_load_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("cache.json");
    let fetcher = ScriptedFetcher::new(Behavior::Succeed);

    let cache = ArticleCache::new(fetcher.clone(), CacheSettings::default());
    cache.get_articles(URL).await.unwrap();
    cache.get_articles("https://b.example/rss").await.unwrap();
    cache.save(&path).await.unwrap();

    let (loaded, outcome) = ArticleCache::load(&path, fetcher.clone(), CacheSettings::default())
        .await
        .unwrap();
    assert_eq!(outcome, LoadOutcome::Loaded);
    assert_eq!(loaded.entries().await, cache.entries().await);

    // Loaded entries are fresh, so no network on read
    loaded.get_articles(URL).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}


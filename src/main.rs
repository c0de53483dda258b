use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use feedstash::backend::{Backend, BackendEvent, CorruptCache, ItemKey, ListItem, NewItem};
use feedstash::config::Config;
use feedstash::feed::{Fetcher, HttpFetcher};
use feedstash::storage::{FeedRef, LoadOutcome};

/// Get the config directory path (~/.config/feedstash/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedstash"))
}

/// SEC-007: Create the config directory with user-only access on Unix.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedstash", about = "Feed directory and article cache for terminal readers")]
struct Args {
    /// Config file (default ~/.config/feedstash/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Feed directory file, overrides the config
    #[arg(long, value_name = "FILE")]
    feeds: Option<PathBuf>,

    /// Article cache file, overrides the config
    #[arg(long, value_name = "FILE")]
    cache: Option<PathBuf>,

    /// Discard the article cache before running
    #[arg(long)]
    reset_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List categories
    Categories,
    /// List the feeds of a category
    Feeds { category: String },
    /// List the articles of a feed
    Articles {
        feed: String,
        /// Only look for the feed inside this category
        #[arg(long)]
        category: Option<String>,
        /// Print the Markdown rendering of each article
        #[arg(long)]
        full: bool,
    },
    /// Add a category
    AddCategory {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Add a feed to a category
    AddFeed {
        category: String,
        name: String,
        url: String,
    },
    /// Remove a category and its feeds
    RemoveCategory { name: String },
    /// Remove a feed from a category
    RemoveFeed { category: String, name: String },
    /// Merge an OPML subscription list into the directory
    Import { file: PathBuf },
    /// Write the directory as OPML
    Export { file: PathBuf },
    /// Show directory and cache counters
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let (config_path, config_dir) = match &args.config {
        Some(path) => {
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (path.clone(), dir)
        }
        None => {
            let dir = get_config_dir()?;
            ensure_config_dir(&dir)?;
            (dir.join("config.toml"), dir)
        }
    };

    let config = Config::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
    let mut backend_config = config.backend_config(&config_dir);
    if let Some(feeds) = &args.feeds {
        backend_config.feeds_path = feeds.clone();
    }
    if let Some(cache) = &args.cache {
        backend_config.cache_path = cache.clone();
    }
    backend_config.reset_cache = args.reset_cache;
    // A corrupt directory still aborts: continuing would overwrite it at close
    backend_config.on_corrupt_cache = CorruptCache::StartEmpty;

    let fetcher: Arc<dyn Fetcher> = Arc::new(
        HttpFetcher::with_timeout(backend_config.cache.fetch_timeout)
            .context("Failed to build HTTP client")?,
    );

    let (event_tx, mut event_rx) = mpsc::channel::<BackendEvent>(32);
    let (backend, startup) = Backend::open(backend_config, fetcher, event_tx)
        .await
        .context("Failed to open feed stores")?;
    if startup.cache == LoadOutcome::Discarded {
        eprintln!("Warning: article cache was corrupt. Starting with an empty cache.");
    }

    let outcome = run(&backend, args.command, &mut event_rx).await;
    let closed = backend.close().await.context("Failed to save state");
    outcome?;
    closed
}

async fn run(
    backend: &Backend,
    command: Command,
    events: &mut mpsc::Receiver<BackendEvent>,
) -> Result<()> {
    match command {
        Command::Categories => {
            backend.fetch_categories().await?;
            print_items(next_event(events).await?, false)
        }
        Command::Feeds { category } => {
            backend.fetch_feeds(category).await?;
            print_items(next_event(events).await?, false)
        }
        Command::Articles {
            feed,
            category,
            full,
        } => {
            let feed = match category {
                Some(category) => FeedRef::in_category(category, feed),
                None => FeedRef::from(feed),
            };
            backend.fetch_articles(feed).await?;
            print_items(next_event(events).await?, full)
        }
        Command::AddCategory { name, description } => {
            backend
                .add_item(NewItem::Category { name, description })
                .await
                .context("Failed to add category")?;
            Ok(())
        }
        Command::AddFeed {
            category,
            name,
            url,
        } => {
            backend
                .add_item(NewItem::Feed {
                    category,
                    name,
                    url,
                })
                .await
                .context("Failed to add feed")?;
            Ok(())
        }
        Command::RemoveCategory { name } => {
            if !backend.delete_item(ItemKey::Category(name.clone())).await {
                eprintln!("No category named '{name}'");
            }
            Ok(())
        }
        Command::RemoveFeed { category, name } => {
            let key = ItemKey::Feed {
                category: category.clone(),
                name: name.clone(),
            };
            if !backend.delete_item(key).await {
                eprintln!("No feed named '{name}' in '{category}'");
            }
            Ok(())
        }
        Command::Import { file } => {
            let added = backend
                .import_opml(&file)
                .await
                .with_context(|| format!("Failed to import '{}'", file.display()))?;
            println!("Imported {added} feeds from {}", file.display());
            Ok(())
        }
        Command::Export { file } => {
            backend
                .export_opml(&file)
                .await
                .with_context(|| format!("Failed to export to '{}'", file.display()))?;
            println!("Exported feeds to {}", file.display());
            Ok(())
        }
        Command::Stats => {
            let stats = backend.stats().await;
            println!("Categories:      {}", stats.categories);
            println!("Feeds:           {}", stats.feeds);
            println!("Cached feeds:    {}", stats.cache.entries);
            println!("Cached articles: {}", stats.cache.articles);
            if let (Some(oldest), Some(newest)) = (stats.cache.oldest, stats.cache.newest) {
                println!("Oldest fetch:    {}", oldest.format("%Y-%m-%d %H:%M UTC"));
                println!("Newest fetch:    {}", newest.format("%Y-%m-%d %H:%M UTC"));
            }
            Ok(())
        }
    }
}

async fn next_event(events: &mut mpsc::Receiver<BackendEvent>) -> Result<BackendEvent> {
    events
        .recv()
        .await
        .context("Backend channel closed before answering")
}

fn print_items(event: BackendEvent, full: bool) -> Result<()> {
    let items = match event {
        BackendEvent::FetchSucceeded { items, .. } => items,
        BackendEvent::FetchFailed {
            description, error, ..
        } => return Err(anyhow::Error::new(error).context(description)),
    };

    for ListItem {
        title,
        detail,
        extra,
    } in items
    {
        println!("{title}");
        if !detail.is_empty() {
            println!("    {detail}");
        }
        if full && !extra.is_empty() {
            println!("\n{extra}\n");
        }
    }
    Ok(())
}

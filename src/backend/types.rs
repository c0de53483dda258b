use thiserror::Error;

use crate::feed::opml::OpmlError;
use crate::feed::FetchError;
use crate::storage::{DirectoryError, FeedRef, PersistError};

/// Display-ready row handed to the UI.
///
/// Every query result (category, feed or article) is normalized into this
/// shape. For articles, `detail` is the plain-text description and `extra`
/// the Markdown rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListItem {
    pub title: String,
    pub detail: String,
    pub extra: String,
}

/// Discriminates directory mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Category,
    Feed,
}

/// A directory entry to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewItem {
    Category {
        name: String,
        description: String,
    },
    Feed {
        category: String,
        name: String,
        url: String,
    },
}

impl NewItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            NewItem::Category { .. } => ItemKind::Category,
            NewItem::Feed { .. } => ItemKind::Feed,
        }
    }
}

/// Key of a directory entry to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKey {
    Category(String),
    Feed { category: String, name: String },
}

impl ItemKey {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemKey::Category(_) => ItemKind::Category,
            ItemKey::Feed { .. } => ItemKind::Feed,
        }
    }
}

/// The query a [`BackendEvent`] answers.
///
/// Results arrive in completion order, so the UI correlates them by request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Categories,
    Feeds(String),
    Articles(FeedRef),
}

/// Errors surfaced by backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Opml(#[from] OpmlError),

    /// The background task answering a request panicked
    #[error("Task '{task}' panicked: {message}")]
    TaskPanicked { task: &'static str, message: String },
}

/// Outcome of a `fetch_*` command, delivered on the backend channel.
///
/// Every command answers with exactly one of these, panics included.
#[derive(Debug)]
pub enum BackendEvent {
    FetchSucceeded {
        request: Request,
        items: Vec<ListItem>,
    },
    /// The request failed.
    ///
    /// `description` is the user-facing summary ("Failed to get feeds");
    /// `error` is the underlying cause.
    FetchFailed {
        request: Request,
        description: &'static str,
        error: BackendError,
    },
}

//! Fetch orchestration over the store, the news client, the merger and the
//! ranker.
//!
//! `NewsService` is what a presentation layer talks to. It owns no state of
//! its own beyond handles: the `Database` and `NewsApiClient` are injected by
//! the caller and may be shared with other components.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::merge::{self, MergeError};
use crate::news::{FetchError, NewsApiClient};
use crate::recommend;
use crate::storage::{Article, Category, Database, UserPreferences};

/// Preferred-category fetches in flight at once during a refresh.
const CATEGORY_FETCH_CONCURRENCY: usize = 4;

/// Failures surfaced to the presentation layer.
///
/// `Display` is the user-visible message.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to load headlines: {0}")]
    Headlines(#[source] FetchError),
    #[error("Search failed: {0}")]
    Search(#[source] FetchError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("Local store unavailable: {0}")]
    Store(String),
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Store(err.to_string())
    }
}

/// Outcome of a headline refresh.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Records merged across all fetches, duplicates across fetches included.
    pub merged: usize,
    /// Preferred categories whose fetch or merge failed.
    pub failed_categories: Vec<Category>,
}

/// Rank the whole cache for `user_id`; the read history is every cached
/// article with `read` set.
pub async fn recommended_for(db: &Database, user_id: &str) -> Result<Vec<Article>, ServiceError> {
    let articles = db.get_ranking_candidates().await?;
    let preferences = db.get_user_preferences(user_id).await?;
    let read: Vec<Article> = articles.iter().filter(|a| a.read).cloned().collect();

    Ok(recommend::rank(&articles, preferences.as_ref(), &read))
}

/// Replace whichever preference sets are given for `user_id`, creating the
/// record with defaults first if needed. Source names are trimmed and blanks
/// dropped; display settings are left alone.
pub async fn update_preferences_for(
    db: &Database,
    user_id: &str,
    categories: Option<Vec<Category>>,
    sources: Option<Vec<String>>,
) -> Result<UserPreferences, ServiceError> {
    let mut prefs = db.get_or_create_user_preferences(user_id).await?;
    if categories.is_none() && sources.is_none() {
        return Ok(prefs);
    }

    if let Some(categories) = categories {
        prefs.preferred_categories = categories.into_iter().collect();
    }
    if let Some(sources) = sources {
        prefs.preferred_sources = sources
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    db.save_user_preferences(&prefs).await?;
    Ok(prefs)
}

#[derive(Clone)]
pub struct NewsService {
    db: Database,
    client: NewsApiClient,
    user_id: String,
}

impl NewsService {
    pub fn new(db: Database, client: NewsApiClient, user_id: impl Into<String>) -> Self {
        Self {
            db,
            client,
            user_id: user_id.into(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current user's preferences, created with defaults on first use.
    pub async fn preferences(&self) -> Result<UserPreferences, ServiceError> {
        Ok(self.db.get_or_create_user_preferences(&self.user_id).await?)
    }

    /// Replace the preferred category and source sets, keeping display
    /// settings.
    pub async fn update_preferences(
        &self,
        categories: impl IntoIterator<Item = Category>,
        sources: impl IntoIterator<Item = String>,
    ) -> Result<UserPreferences, ServiceError> {
        update_preferences_for(
            &self.db,
            &self.user_id,
            Some(categories.into_iter().collect()),
            Some(sources.into_iter().collect()),
        )
        .await
    }

    /// Fetch general headlines, then every preferred category, merging each
    /// result into the store.
    ///
    /// A failed general fetch aborts the refresh. Failures of individual
    /// category fetches are logged and reported in the summary.
    pub async fn refresh(&self) -> Result<RefreshSummary, ServiceError> {
        let headlines = self
            .client
            .top_headlines(None)
            .await
            .map_err(ServiceError::Headlines)?;
        let mut summary = RefreshSummary {
            merged: merge::merge(&self.db, &headlines, Category::General).await?,
            ..RefreshSummary::default()
        };

        let preferred: Vec<Category> = self
            .preferences()
            .await?
            .preferred_categories
            .into_iter()
            .filter(|c| *c != Category::Search)
            .collect();

        let results: Vec<(Category, Result<usize, ServiceError>)> = stream::iter(preferred)
            .map(|category| async move {
                let result = match self.client.top_headlines(Some(category)).await {
                    Ok(batch) => merge::merge(&self.db, &batch, category)
                        .await
                        .map_err(ServiceError::from),
                    Err(e) => Err(ServiceError::Headlines(e)),
                };
                (category, result)
            })
            .buffer_unordered(CATEGORY_FETCH_CONCURRENCY)
            .collect()
            .await;

        for (category, result) in results {
            match result {
                Ok(count) => summary.merged += count,
                Err(e) => {
                    tracing::warn!(category = %category, error = %e, "Category refresh failed");
                    summary.failed_categories.push(category);
                }
            }
        }
        summary.failed_categories.sort();

        tracing::info!(
            merged = summary.merged,
            failed = summary.failed_categories.len(),
            "Headlines refreshed"
        );
        Ok(summary)
    }

    /// Search the remote source and cache the hits under the search sentinel.
    ///
    /// Returns the stored records in API order, so the caller sees the
    /// user's existing saved/read flags. A blank query returns nothing and
    /// makes no request.
    pub async fn search(&self, query: &str) -> Result<Vec<Article>, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let batch = self
            .client
            .search(query)
            .await
            .map_err(ServiceError::Search)?;
        merge::merge(&self.db, &batch, Category::Search).await?;

        let mut seen = HashSet::new();
        let mut results = Vec::with_capacity(batch.len());
        for dto in &batch {
            if !seen.insert(dto.url.as_str()) {
                continue;
            }
            if let Some(article) = self.db.get_article(&dto.url).await? {
                results.push(article);
            }
        }
        Ok(results)
    }

    /// Rank the whole cache for the current user.
    ///
    /// Preferences are read but never created here, so a user without a
    /// record gets the newest-first fallback.
    pub async fn recommended(&self) -> Result<Vec<Article>, ServiceError> {
        recommended_for(&self.db, &self.user_id).await
    }

    /// Flip the bookmark flag; `None` if the URL is not cached.
    pub async fn toggle_saved(&self, url: &str) -> Result<Option<bool>, ServiceError> {
        Ok(self.db.toggle_saved(url).await?)
    }

    pub async fn mark_read(&self, url: &str) -> Result<bool, ServiceError> {
        Ok(self.db.mark_read(url).await?)
    }

    /// Keep a ranked list up to date with the store.
    ///
    /// Spawns a task that ranks once, then again after every store change
    /// (merges, flag updates, preference writes). The receiver starts with an
    /// empty list; wait on `changed()` for the first ranking. The task ends
    /// when every receiver is dropped.
    pub fn watch_recommendations(
        &self,
    ) -> (watch::Receiver<Arc<Vec<Article>>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(Arc::new(Vec::new()));
        let mut changes = self.db.subscribe();
        let service = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                // Mark seen before querying so a write during ranking triggers another pass
                changes.borrow_and_update();

                match service.recommended().await {
                    Ok(ranked) => {
                        if tx.send(Arc::new(ranked)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to recompute recommendations");
                    }
                }

                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
            tracing::debug!("Recommendation watcher stopped");
        });

        (rx, handle)
    }
}

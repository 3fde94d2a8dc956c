use anyhow::Result;

use super::schema::Database;
use super::types::{Article, ArticleDbRow, Category, IncomingArticle};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles returned by the listing queries (OOM protection).
/// Ranking reads the full set through [`Database::get_ranking_candidates`].
pub const MAX_ARTICLES: i64 = 5000;

const ARTICLE_COLUMNS: &str = "url, title, author, source, description, content, image_url, \
                               published_at, category, saved, read";

impl Database {
    // ========================================================================
    // Article Upsert
    // ========================================================================

    /// Insert an article, or refresh the descriptive fields of the stored
    /// record with the same URL.
    ///
    /// `saved` and `read` are never part of the update set, so a re-fetch
    /// cannot clobber the user's bookmark or read state. New rows take the
    /// column defaults (both false). Applying the same record twice leaves
    /// the store unchanged.
    ///
    /// Does not notify subscribers; callers batch notifications.
    pub(crate) async fn upsert_article(&self, article: &IncomingArticle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO articles (url, title, author, source, description, content,
                                  image_url, published_at, category)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                source = excluded.source,
                description = excluded.description,
                content = excluded.content,
                image_url = excluded.image_url,
                published_at = excluded.published_at,
                category = excluded.category
        "#,
        )
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.author)
        .bind(&article.source)
        .bind(&article.description)
        .bind(&article.content)
        .bind(&article.image_url)
        .bind(article.published_at.timestamp())
        .bind(article.category.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// All cached articles, newest first.
    pub async fn get_all_articles(&self) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY published_at DESC, url LIMIT ?"
        ))
        .bind(MAX_ARTICLES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// Every cached article, newest first, with no row cap.
    ///
    /// The ranker scores the whole cache and derives the read history from
    /// it, so a capped listing would drop both old candidates and old reads.
    pub async fn get_ranking_candidates(&self) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY published_at DESC, url"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// Cached articles filed under `category`, newest first.
    pub async fn get_articles_by_category(&self, category: Category) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE category = ? \
             ORDER BY published_at DESC, url LIMIT ?"
        ))
        .bind(category.as_str())
        .bind(MAX_ARTICLES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// Bookmarked articles, newest first.
    pub async fn get_saved_articles(&self) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE saved = 1 \
             ORDER BY published_at DESC, url LIMIT ?"
        ))
        .bind(MAX_ARTICLES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// Articles the user has opened, newest first.
    pub async fn get_read_articles(&self) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE read = 1 \
             ORDER BY published_at DESC, url LIMIT ?"
        ))
        .bind(MAX_ARTICLES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    pub async fn get_article(&self, url: &str) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ArticleDbRow::into_article))
    }

    pub async fn count_articles(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    // ========================================================================
    // Flag Mutations
    // ========================================================================

    /// Set the bookmark flag, returns whether a stored article matched `url`.
    pub async fn set_saved(&self, url: &str, saved: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE articles SET saved = ? WHERE url = ?")
            .bind(saved)
            .bind(url)
            .execute(&self.pool)
            .await?;

        let matched = result.rows_affected() > 0;
        if matched {
            self.notify_changed();
        }
        Ok(matched)
    }

    /// Atomically toggle the bookmark flag, returning the new value, or `None`
    /// if no article has this URL.
    ///
    /// Uses RETURNING so the read and the write are a single statement.
    pub async fn toggle_saved(&self, url: &str) -> Result<Option<bool>> {
        let row: Option<(bool,)> =
            sqlx::query_as("UPDATE articles SET saved = NOT saved WHERE url = ? RETURNING saved")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;

        if row.is_some() {
            self.notify_changed();
        }
        Ok(row.map(|(saved,)| saved))
    }

    /// Mark an article as read (idempotent), returns whether it was changed
    pub async fn mark_read(&self, url: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE articles SET read = 1 WHERE url = ? AND read = 0")
            .bind(url)
            .execute(&self.pool)
            .await?;

        let changed = result.rows_affected() > 0;
        if changed {
            self.notify_changed();
        }
        Ok(changed)
    }
}

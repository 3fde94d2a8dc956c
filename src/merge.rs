//! Cache merger: reconciles freshly fetched articles into the local store.
//!
//! Each incoming record is upserted by URL. New URLs are inserted with
//! `saved = false` and `read = false`; known URLs get every descriptive
//! field replaced while the user's `saved`/`read` flags are kept. The rule
//! is idempotent and, per URL, independent of which batch lands first, so
//! concurrent merges from overlapping fetches need no extra locking.
//!
//! Records are applied one statement at a time. A store failure part-way
//! through a batch leaves the already-applied records in place.

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use crate::news::ArticleDto;
use crate::storage::{Category, Database, IncomingArticle};

/// Publication timestamp layout used by the news API (always UTC).
pub const PUBLISHED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Error)]
pub enum MergeError {
    /// The local store rejected or could not serve a write
    #[error("Local store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Parse a `yyyy-MM-ddTHH:mm:ssZ` timestamp.
pub fn parse_published_at(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), PUBLISHED_AT_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Map a fetched DTO onto the stored article shape.
///
/// A missing timestamp, or one that does not parse, falls back to `now`.
pub fn to_incoming(dto: &ArticleDto, category: Category, now: DateTime<Utc>) -> IncomingArticle {
    let raw = dto.published_at.as_deref().unwrap_or_default();
    let published_at = parse_published_at(raw).unwrap_or_else(|| {
        tracing::debug!(
            url = %dto.url,
            published_at = raw,
            "Malformed publication timestamp, using merge time"
        );
        now
    });

    IncomingArticle {
        url: dto.url.clone(),
        title: dto.title.clone(),
        author: dto.author.clone(),
        source: dto.source.name.clone(),
        description: dto.description.clone(),
        content: dto.content.clone(),
        image_url: dto.url_to_image.clone(),
        published_at,
        category,
    }
}

/// Merge a fetched batch into the store under `category`.
///
/// Returns the number of records applied (inserted or updated). Duplicate
/// URLs inside one batch are applied in order, so the last one wins.
/// Subscribers are notified once per batch that applied at least one record,
/// including a batch that fails part-way.
///
/// # Errors
///
/// [`MergeError::StoreUnavailable`] on the first failed write. The error is
/// not retried here.
pub async fn merge(
    db: &Database,
    batch: &[ArticleDto],
    category: Category,
) -> Result<usize, MergeError> {
    if batch.is_empty() {
        return Ok(0);
    }

    let now = Utc::now();
    let mut applied = 0;

    for dto in batch {
        let incoming = to_incoming(dto, category, now);
        if let Err(e) = db.upsert_article(&incoming).await {
            tracing::warn!(
                url = %incoming.url,
                applied = applied,
                error = %e,
                "Merge aborted by store failure"
            );
            if applied > 0 {
                db.notify_changed();
            }
            return Err(MergeError::StoreUnavailable(e.to_string()));
        }
        applied += 1;
    }

    db.notify_changed();
    tracing::debug!(category = %category, merged = applied, "Merged article batch");
    Ok(applied)
}

//! "Recommended for you" ranking over the cached article set.
//!
//! Pure functions of their inputs: no store access, no clock reads except in
//! [`rank`], which samples `Utc::now()` once and delegates to [`rank_at`].
//!
//! Score of one article under a set of preferences:
//!
//! | term | value |
//! |---|---|
//! | preferred category | `+10.0` |
//! | preferred source | `+5.0` |
//! | recency | `24.0 / (age_hours + 1.0)` |
//! | read articles from the same source | `+0.5` each |
//! | read articles in the same category | `+0.5` each |
//! | article itself already read | `-50.0` |
//!
//! The read penalty demotes, it does not filter: a read article with strong
//! enough affinity terms can still outrank unread ones.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::storage::{Article, Category, UserPreferences};

pub const PREFERRED_CATEGORY_BONUS: f64 = 10.0;
pub const PREFERRED_SOURCE_BONUS: f64 = 5.0;
pub const RECENCY_WEIGHT: f64 = 24.0;
pub const READ_AFFINITY_BONUS: f64 = 0.5;
pub const ALREADY_READ_PENALTY: f64 = 50.0;

/// Resolution at which scores are compared; closer scores count as a tie.
pub const SCORE_RESOLUTION: f64 = 1e-9;

/// Counts derived from the read history, built once per ranking.
#[derive(Debug, Default)]
pub struct ReadHistory<'a> {
    urls: HashSet<&'a str>,
    by_source: HashMap<&'a str, usize>,
    by_category: HashMap<Category, usize>,
}

impl<'a> ReadHistory<'a> {
    pub fn new(read_articles: &'a [Article]) -> Self {
        let mut history = Self::default();
        for article in read_articles {
            history.urls.insert(article.url.as_str());
            *history.by_source.entry(article.source.as_str()).or_default() += 1;
            *history.by_category.entry(article.category).or_default() += 1;
        }
        history
    }

    fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    fn source_count(&self, source: &str) -> usize {
        self.by_source.get(source).copied().unwrap_or(0)
    }

    fn category_count(&self, category: Category) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }
}

/// Whole hours since `published_at`, clamped to zero for future timestamps.
pub fn age_hours(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - published_at).num_hours().max(0) as f64
}

/// Recency term: 24 for a fresh article, decaying toward (never reaching) 0.
pub fn recency_score(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    RECENCY_WEIGHT / (age_hours(published_at, now) + 1.0)
}

/// Relevance score of one article.
pub fn score(
    article: &Article,
    preferences: &UserPreferences,
    history: &ReadHistory<'_>,
    now: DateTime<Utc>,
) -> f64 {
    let mut score = 0.0;

    if preferences.preferred_categories.contains(&article.category) {
        score += PREFERRED_CATEGORY_BONUS;
    }
    if preferences.preferred_sources.contains(&article.source) {
        score += PREFERRED_SOURCE_BONUS;
    }

    score += recency_score(article.published_at, now);
    score += READ_AFFINITY_BONUS * history.source_count(&article.source) as f64;
    score += READ_AFFINITY_BONUS * history.category_count(article.category) as f64;

    if history.contains(&article.url) {
        score -= ALREADY_READ_PENALTY;
    }

    score
}

fn tie_key(score: f64) -> f64 {
    (score / SCORE_RESOLUTION).round()
}

/// Rank `articles` for display, evaluated at the current wall-clock time.
pub fn rank(
    articles: &[Article],
    preferences: Option<&UserPreferences>,
    read_articles: &[Article],
) -> Vec<Article> {
    rank_at(articles, preferences, read_articles, Utc::now())
}

/// Rank `articles` as of `now`.
///
/// Without preferences the result is newest-first by `published_at`.
/// Otherwise articles are ordered by descending [`score`]. Both sorts are
/// stable: ties keep their input order.
pub fn rank_at(
    articles: &[Article],
    preferences: Option<&UserPreferences>,
    read_articles: &[Article],
    now: DateTime<Utc>,
) -> Vec<Article> {
    let Some(preferences) = preferences else {
        let mut ranked = articles.to_vec();
        ranked.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        return ranked;
    };

    let history = ReadHistory::new(read_articles);
    let mut scored: Vec<(f64, &Article)> = articles
        .iter()
        .map(|article| (score(article, preferences, &history, now), article))
        .collect();
    // Snap to the resolution grid so sums that differ only by rounding tie
    scored.sort_by(|(a, _), (b, _)| tie_key(*b).total_cmp(&tie_key(*a)));

    scored
        .into_iter()
        .map(|(_, article)| article.clone())
        .collect()
}

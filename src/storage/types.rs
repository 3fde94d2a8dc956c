use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The news database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown category: {0}")]
pub struct UnknownCategory(pub String);

// ============================================================================
// Category
// ============================================================================

/// Article category as filed by the headline fetch.
///
/// `Search` is the sentinel for articles cached from an ad-hoc query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Business,
    Entertainment,
    General,
    Health,
    Science,
    Sports,
    Technology,
    Search,
}

impl Category {
    /// Categories the headline endpoint accepts (everything but `Search`).
    pub const HEADLINES: [Category; 7] = [
        Category::Business,
        Category::Entertainment,
        Category::General,
        Category::Health,
        Category::Science,
        Category::Sports,
        Category::Technology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Business => "business",
            Category::Entertainment => "entertainment",
            Category::General => "general",
            Category::Health => "health",
            Category::Science => "science",
            Category::Sports => "sports",
            Category::Technology => "technology",
            Category::Search => "search",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "business" => Ok(Category::Business),
            "entertainment" => Ok(Category::Entertainment),
            "general" => Ok(Category::General),
            "health" => Ok(Category::Health),
            "science" => Ok(Category::Science),
            "sports" => Ok(Category::Sports),
            "technology" => Ok(Category::Technology),
            "search" => Ok(Category::Search),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Descriptive fields of an article ready to be merged into the store.
///
/// Carries no `saved`/`read` flags: those belong to the stored record and are
/// never written by a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingArticle {
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub source: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub category: Category,
}

/// Internal row type for Article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub source: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub published_at: i64,
    pub category: String,
    pub saved: bool,
    pub read: bool,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        let category = self.category.parse().unwrap_or_else(|_| {
            tracing::warn!(
                url = %self.url,
                category = %self.category,
                "Unknown stored category, filing under general"
            );
            Category::General
        });
        let published_at = DateTime::from_timestamp(self.published_at, 0).unwrap_or_default();

        Article {
            url: self.url,
            title: self.title,
            author: self.author,
            source: self.source,
            description: self.description,
            content: self.content,
            image_url: self.image_url,
            published_at,
            category,
            saved: self.saved,
            read: self.read,
        }
    }
}

/// Internal row type for the user_preferences table
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PreferencesDbRow {
    pub user_id: String,
    pub preferred_categories: String,
    pub preferred_sources: String,
    pub text_size: i64,
    pub dark_mode: bool,
}

impl PreferencesDbRow {
    /// Corrupt JSON in a set column reads back as an empty set.
    pub(crate) fn into_preferences(self) -> UserPreferences {
        let preferred_categories = serde_json::from_str(&self.preferred_categories)
            .unwrap_or_else(|e| {
                tracing::warn!(
                    user_id = %self.user_id,
                    error = %e,
                    "Corrupt preferred_categories, ignoring"
                );
                BTreeSet::new()
            });
        let preferred_sources = serde_json::from_str(&self.preferred_sources).unwrap_or_else(|e| {
            tracing::warn!(
                user_id = %self.user_id,
                error = %e,
                "Corrupt preferred_sources, ignoring"
            );
            BTreeSet::new()
        });

        UserPreferences {
            user_id: self.user_id,
            preferred_categories,
            preferred_sources,
            text_size: u32::try_from(self.text_size).unwrap_or(UserPreferences::DEFAULT_TEXT_SIZE),
            dark_mode: self.dark_mode,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Article data from database
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub source: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub category: Category,
    pub saved: bool,
    pub read: bool,
}

/// Per-user ranking preferences plus display settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPreferences {
    pub user_id: String,
    pub preferred_categories: BTreeSet<Category>,
    pub preferred_sources: BTreeSet<String>,
    pub text_size: u32,
    pub dark_mode: bool,
}

impl UserPreferences {
    pub const DEFAULT_TEXT_SIZE: u32 = 16;

    /// Preferences created on first use: general and technology headlines,
    /// no preferred sources.
    pub fn with_defaults(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            preferred_categories: BTreeSet::from([Category::General, Category::Technology]),
            preferred_sources: BTreeSet::new(),
            text_size: Self::DEFAULT_TEXT_SIZE,
            dark_mode: false,
        }
    }
}

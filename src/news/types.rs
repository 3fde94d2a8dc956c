use serde::{Deserialize, Serialize};

/// Envelope returned by both NewsAPI endpoints.
///
/// Error responses carry `status = "error"` plus `code` and `message`
/// instead of articles.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsResponse {
    pub status: String,
    #[serde(default)]
    pub total_results: Option<i64>,
    #[serde(default)]
    pub articles: Vec<ArticleDto>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl NewsResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// One article as the remote API delivers it.
///
/// `published_at` is kept as the raw string, and may be null or absent;
/// parsing (and the fallback for malformed values) happens when the article
/// is merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDto {
    pub source: SourceDto,
    #[serde(default)]
    pub author: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    #[serde(default)]
    pub url_to_image: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDto {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

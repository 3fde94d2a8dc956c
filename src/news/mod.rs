//! Remote news source: NewsAPI DTOs and the HTTP client that fetches them.
//!
//! - [`types`] - Wire envelopes (`NewsResponse`, `ArticleDto`, `SourceDto`)
//! - [`client`] - `NewsApiClient` with retry, size limits and API-status checks
//!
//! The client only fetches. Reconciling the fetched articles into the local
//! store is the job of [`crate::merge`].

mod client;
mod types;

pub use client::{ClientOptions, FetchError, NewsApiClient, DEFAULT_BASE_URL};
pub use types::{ArticleDto, NewsResponse, SourceDto};

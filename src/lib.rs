//! newsdesk: a local cache of NewsAPI headlines with bookmarking, read
//! tracking and a personalized "recommended for you" ranking.
//!
//! - [`storage`] - SQLite store for articles and user preferences, with change
//!   subscriptions
//! - [`merge`] - reconciles fetched batches into the store without touching
//!   the user's saved/read flags
//! - [`recommend`] - pure ranking over the cached articles
//! - [`news`] - NewsAPI client and wire types
//! - [`service`] - orchestration used by the CLI (refresh, search, ranking)
//! - [`config`] - `config.toml` loading

pub mod config;
pub mod merge;
pub mod news;
pub mod recommend;
pub mod service;
pub mod storage;

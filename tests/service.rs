//! Integration tests for the service layer against a mock news API.
//!
//! Every test gets its own in-memory database and wiremock server, so the
//! full refresh → merge → rank path runs without network access.

use chrono::{Duration as ChronoDuration, Utc};
use newsdesk::merge::merge;
use newsdesk::news::{ArticleDto, ClientOptions, NewsApiClient, SourceDto};
use newsdesk::service::{recommended_for, update_preferences_for, NewsService, ServiceError};
use newsdesk::storage::{Article, Category, Database, MAX_ARTICLES};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER: &str = "user_1";

fn envelope(urls: &[&str]) -> String {
    let articles: Vec<String> = urls
        .iter()
        .map(|url| {
            format!(
                r#"{{"source": {{"id": null, "name": "Wire"}}, "title": "Story {url}",
                    "url": "{url}", "publishedAt": "2024-03-01T10:00:00Z"}}"#
            )
        })
        .collect();
    format!(
        r#"{{"status": "ok", "totalResults": {}, "articles": [{}]}}"#,
        urls.len(),
        articles.join(",")
    )
}

fn ok(urls: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(envelope(urls))
}

fn api_error(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(format!(
        r#"{{"status": "error", "code": "unexpectedError", "message": "{message}"}}"#
    ))
}

fn client(base_url: String) -> NewsApiClient {
    let mut options = ClientOptions::new(SecretString::from("test-key"));
    options.base_url = base_url;
    options.retry_base_delay = Duration::from_millis(1);
    NewsApiClient::new(reqwest::Client::new(), options).unwrap()
}

async fn service_for(server: &MockServer) -> NewsService {
    let db = Database::open(":memory:").await.unwrap();
    NewsService::new(db, client(server.uri()), USER)
}

fn dto(url: &str, hours_ago: i64) -> ArticleDto {
    ArticleDto {
        source: SourceDto {
            id: None,
            name: "Wire".to_string(),
        },
        author: None,
        title: format!("Story {url}"),
        description: None,
        url: url.to_string(),
        url_to_image: None,
        published_at: Some(
            (Utc::now() - ChronoDuration::hours(hours_ago))
                .format("%Y-%m-%dT%H:%M:%SZ")
                .to_string(),
        ),
        content: None,
    }
}

/// Wait until the watched ranking satisfies `pred`, failing after a second.
async fn wait_for(
    rx: &mut watch::Receiver<Arc<Vec<Article>>>,
    pred: impl Fn(&[Article]) -> bool,
) -> Arc<Vec<Article>> {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            {
                let current = rx.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("ranking did not update in time")
}

fn urls(articles: &[Article]) -> Vec<&str> {
    articles.iter().map(|a| a.url.as_str()).collect()
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_merges_headlines_and_preferred_categories() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/top-headlines"))
        .and(query_param("category", "technology"))
        .respond_with(ok(&["https://t/1", "https://shared"]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/top-headlines"))
        .and(query_param("category", "general"))
        .respond_with(ok(&["https://g/1"]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/top-headlines"))
        .respond_with(ok(&["https://h/1", "https://shared"]))
        .mount(&server)
        .await;

    let service = service_for(&server).await;
    let summary = service.refresh().await.unwrap();

    assert_eq!(summary.merged, 5);
    assert!(summary.failed_categories.is_empty());
    assert_eq!(service.database().count_articles().await.unwrap(), 4);
}

#[tokio::test]
async fn test_refresh_reports_failed_category() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/top-headlines"))
        .and(query_param("category", "technology"))
        .respond_with(api_error("Category unavailable"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/top-headlines"))
        .respond_with(ok(&["https://h/1"]))
        .mount(&server)
        .await;

    let service = service_for(&server).await;
    let summary = service.refresh().await.unwrap();

    assert_eq!(summary.failed_categories, vec![Category::Technology]);
    // Headlines and the general category both served the same record
    assert_eq!(summary.merged, 2);
    assert_eq!(service.database().count_articles().await.unwrap(), 1);
}

#[tokio::test]
async fn test_refresh_fails_when_headlines_fail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string(
            r#"{"status":"error","code":"apiKeyInvalid","message":"Your API key is invalid."}"#,
        ))
        .mount(&server)
        .await;

    let service = service_for(&server).await;
    let err = service.refresh().await.unwrap_err();

    assert!(matches!(err, ServiceError::Headlines(_)));
    assert!(err.to_string().starts_with("Failed to load headlines"));
    assert_eq!(service.database().count_articles().await.unwrap(), 0);
}

#[tokio::test]
async fn test_refresh_skips_categories_not_preferred() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/top-headlines"))
        .and(query_param("category", "technology"))
        .respond_with(ok(&[]))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/top-headlines"))
        .respond_with(ok(&["https://h/1"]))
        .mount(&server)
        .await;

    let service = service_for(&server).await;
    service
        .update_preferences([Category::Science], Vec::new())
        .await
        .unwrap();
    let summary = service.refresh().await.unwrap();

    assert!(summary.failed_categories.is_empty());
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

// ============================================================================
// Search
// ============================================================================

#[tokio::test]
async fn test_search_caches_results_and_keeps_flags() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/everything"))
        .and(query_param("q", "rust"))
        .respond_with(ok(&["https://known", "https://new", "https://known"]))
        .mount(&server)
        .await;

    let service = service_for(&server).await;
    merge(service.database(), &[dto("https://known", 3)], Category::Business)
        .await
        .unwrap();
    service.mark_read("https://known").await.unwrap();

    let results = service.search("  rust ").await.unwrap();

    assert_eq!(urls(&results), vec!["https://known", "https://new"]);
    assert!(results[0].read);
    assert!(!results[1].read);
    assert!(results.iter().all(|a| a.category == Category::Search));
}

#[tokio::test]
async fn test_blank_search_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ok(&[]))
        .expect(0)
        .mount(&server)
        .await;

    let service = service_for(&server).await;
    assert!(service.search("   ").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_api_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(api_error("Query too long"))
        .mount(&server)
        .await;

    let service = service_for(&server).await;
    let err = service.search("rust").await.unwrap_err();

    assert!(matches!(err, ServiceError::Search(_)));
    assert_eq!(err.to_string(), "Search failed: API error: error (Query too long)");
}

// ============================================================================
// Preferences and ranking
// ============================================================================

#[tokio::test]
async fn test_update_preferences_keeps_display_settings() {
    let server = MockServer::start().await;
    let service = service_for(&server).await;

    let before = service.preferences().await.unwrap();
    let updated = service
        .update_preferences(
            [Category::Health, Category::Sports],
            vec![" Wire ".to_string(), String::new()],
        )
        .await
        .unwrap();

    assert_eq!(updated.text_size, before.text_size);
    assert_eq!(updated.dark_mode, before.dark_mode);
    assert_eq!(
        updated.preferred_categories.into_iter().collect::<Vec<_>>(),
        vec![Category::Health, Category::Sports]
    );
    assert_eq!(
        updated.preferred_sources.into_iter().collect::<Vec<_>>(),
        vec!["Wire".to_string()]
    );
}

#[tokio::test]
async fn test_partial_preference_update_keeps_other_set() {
    let db = Database::open(":memory:").await.unwrap();

    let untouched = update_preferences_for(&db, USER, None, None).await.unwrap();
    assert_eq!(
        untouched.preferred_categories.iter().copied().collect::<Vec<_>>(),
        vec![Category::General, Category::Technology]
    );

    let updated = update_preferences_for(
        &db,
        USER,
        None,
        Some(vec!["Desk".to_string(), "  ".to_string()]),
    )
    .await
    .unwrap();
    assert_eq!(updated.preferred_categories, untouched.preferred_categories);
    assert_eq!(
        updated.preferred_sources.into_iter().collect::<Vec<_>>(),
        vec!["Desk".to_string()]
    );

    let stored = db.get_user_preferences(USER).await.unwrap().unwrap();
    assert!(stored.preferred_sources.contains("Desk"));
}

#[tokio::test]
async fn test_recommended_without_preferences_is_newest_first() {
    let server = MockServer::start().await;
    let service = service_for(&server).await;
    merge(
        service.database(),
        &[dto("https://old", 30), dto("https://new", 1)],
        Category::Sports,
    )
    .await
    .unwrap();

    let ranked = service.recommended().await.unwrap();
    assert_eq!(urls(&ranked), vec!["https://new", "https://old"]);
    assert!(service
        .database()
        .get_user_preferences(USER)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_watch_recommendations_follows_store_changes() {
    let server = MockServer::start().await;
    let service = service_for(&server).await;
    service.preferences().await.unwrap();
    merge(
        service.database(),
        &[dto("https://a", 1), dto("https://b", 2)],
        Category::General,
    )
    .await
    .unwrap();

    let (mut rx, handle) = service.watch_recommendations();

    let first = wait_for(&mut rx, |ranked| ranked.len() == 2).await;
    assert_eq!(urls(&first), vec!["https://a", "https://b"]);

    service.mark_read("https://a").await.unwrap();
    let second = wait_for(&mut rx, |ranked| {
        ranked.first().map(|a| a.url.as_str()) == Some("https://b")
    })
    .await;
    assert!(second[1].read);

    drop(rx);
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("watcher did not stop")
        .unwrap();
}

// ============================================================================
// Ranking over a large cache
// ============================================================================

fn sourced(url: &str, source: &str, published_at: chrono::DateTime<Utc>) -> ArticleDto {
    ArticleDto {
        source: SourceDto {
            id: None,
            name: source.to_string(),
        },
        published_at: Some(published_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        ..dto(url, 0)
    }
}

/// More than `MAX_ARTICLES` filler rows, four old Desk reads at the very
/// bottom of the newest-first order, and two fresh candidates that differ
/// only in source.
async fn seed_large_cache(db: &Database) {
    let filler_base = Utc::now() - ChronoDuration::days(365);
    let filler: Vec<ArticleDto> = (0..MAX_ARTICLES)
        .map(|i| {
            sourced(
                &format!("https://filler/{i}"),
                "Wire",
                filler_base - ChronoDuration::minutes(i),
            )
        })
        .collect();
    merge(db, &filler, Category::General).await.unwrap();

    let read_base = Utc::now() - ChronoDuration::days(5 * 365);
    let reads: Vec<ArticleDto> = (0..4)
        .map(|i| {
            sourced(
                &format!("https://read/{i}"),
                "Desk",
                read_base - ChronoDuration::hours(i),
            )
        })
        .collect();
    merge(db, &reads, Category::Health).await.unwrap();
    for dto in &reads {
        db.mark_read(&dto.url).await.unwrap();
    }

    let fresh = Utc::now() - ChronoDuration::hours(1);
    merge(
        db,
        &[
            sourced("https://a-herald", "Herald", fresh),
            sourced("https://b-desk", "Desk", fresh),
        ],
        Category::Sports,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_ranking_covers_every_cached_article() {
    let db = Database::open(":memory:").await.unwrap();
    seed_large_cache(&db).await;

    let stored = db.count_articles().await.unwrap();
    assert!(stored > MAX_ARTICLES);

    // Without preferences: newest-first fallback, still over the full set
    let ranked = recommended_for(&db, USER).await.unwrap();
    assert_eq!(ranked.len() as i64, stored);
    assert_eq!(ranked.last().unwrap().url, "https://read/3");
}

#[tokio::test]
async fn test_ranking_counts_reads_beyond_listing_cap() {
    let server = MockServer::start().await;
    let service = service_for(&server).await;
    seed_large_cache(service.database()).await;
    service
        .update_preferences(Vec::<Category>::new(), Vec::new())
        .await
        .unwrap();

    // Four Desk reads give the Desk candidate +2.0 over its otherwise equal twin
    let ranked = service.recommended().await.unwrap();
    assert_eq!(
        ranked.len() as i64,
        service.database().count_articles().await.unwrap()
    );
    assert_eq!(urls(&ranked[..2]), vec!["https://b-desk", "https://a-herald"]);
    assert!(ranked.iter().rev().take(4).all(|a| a.read));
}

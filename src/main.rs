use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use newsdesk::config::{Config, API_KEY_ENV};
use newsdesk::news::NewsApiClient;
use newsdesk::service::{recommended_for, update_preferences_for, NewsService};
use newsdesk::storage::{Article, Category, Database, DatabaseError};

/// Get the config directory path (~/.config/newsdesk/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newsdesk"))
}

#[derive(Parser, Debug)]
#[command(name = "newsdesk", about = "Cached news headlines, ranked for you")]
struct Args {
    /// Config file (default: ~/.config/newsdesk/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Reset database (delete and recreate)
    #[arg(long, global = true)]
    reset_db: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch top headlines and preferred categories into the cache
    Refresh,
    /// Search the news API and cache the results
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// List cached articles, newest first
    List {
        #[arg(long)]
        category: Option<Category>,
        /// Only bookmarked articles
        #[arg(long, conflicts_with = "category")]
        saved: bool,
    },
    /// Show cached articles ranked for the current user
    Recommend {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Toggle the bookmark on a cached article
    Save { url: String },
    /// Mark a cached article as read
    Read { url: String },
    /// Show or update preferred categories and sources
    Prefs {
        #[arg(long, value_delimiter = ',')]
        categories: Option<Vec<Category>>,
        #[arg(long, value_delimiter = ',')]
        sources: Option<Vec<String>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(|| config_dir.join("news.db"));

    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    // First run creates the default preference record
    db.get_or_create_user_preferences(&config.user_id)
        .await
        .context("Failed to load user preferences")?;

    match args.command {
        Command::Refresh => {
            let service = online_service(&config, db)?;
            let summary = service.refresh().await?;
            println!("Merged {} articles.", summary.merged);
            for category in summary.failed_categories {
                eprintln!("Warning: failed to refresh {category} headlines");
            }
        }
        Command::Search { query } => {
            let service = online_service(&config, db)?;
            let results = service.search(&query.join(" ")).await?;
            if results.is_empty() {
                println!("No results.");
            }
            print_articles(&results);
        }
        Command::List { category, saved } => {
            let articles = match (category, saved) {
                (_, true) => db.get_saved_articles().await?,
                (Some(category), false) => db.get_articles_by_category(category).await?,
                (None, false) => db.get_all_articles().await?,
            };
            print_articles(&articles);
        }
        Command::Recommend { limit } => {
            let ranked = recommended_for(&db, &config.user_id).await?;
            let shown = ranked.len().min(limit);
            print_articles(&ranked[..shown]);
        }
        Command::Save { url } => match db.toggle_saved(&url).await? {
            Some(true) => println!("Saved."),
            Some(false) => println!("Removed from saved."),
            None => anyhow::bail!("No cached article with URL {url}"),
        },
        Command::Read { url } => {
            if db.get_article(&url).await?.is_none() {
                anyhow::bail!("No cached article with URL {url}");
            }
            db.mark_read(&url).await?;
            println!("Marked as read.");
        }
        Command::Prefs {
            categories,
            sources,
        } => {
            let prefs =
                update_preferences_for(&db, &config.user_id, categories, sources).await?;
            let categories: Vec<_> = prefs
                .preferred_categories
                .iter()
                .map(Category::as_str)
                .collect();
            let sources: Vec<_> = prefs.preferred_sources.iter().map(String::as_str).collect();
            println!("user:       {}", prefs.user_id);
            println!("categories: {}", categories.join(", "));
            println!("sources:    {}", sources.join(", "));
        }
    }

    Ok(())
}

/// Build the service for commands that talk to the news API.
fn online_service(config: &Config, db: Database) -> Result<NewsService> {
    let api_key = config
        .resolve_api_key(std::env::var(API_KEY_ENV).ok())
        .ok_or_else(|| anyhow::anyhow!("No API key: set {API_KEY_ENV} or api_key in config.toml"))?;
    let http = reqwest::Client::builder()
        .user_agent(concat!("newsdesk/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let client = NewsApiClient::new(http, config.client_options(api_key))?;
    Ok(NewsService::new(db, client, config.user_id.clone()))
}

fn print_articles(articles: &[Article]) {
    for article in articles {
        let flags = format!(
            "{}{}",
            if article.saved { "*" } else { " " },
            if article.read { " " } else { "•" }
        );
        println!(
            "{} {}  [{}] {} | {}",
            flags,
            article.published_at.format("%Y-%m-%d %H:%M"),
            article.category,
            article.source,
            article.title
        );
        println!("      {}", article.url);
    }
}

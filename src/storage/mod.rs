mod articles;
mod preferences;
mod schema;
mod types;

pub use articles::MAX_ARTICLES;
pub use schema::{Database, IN_MEMORY};
pub use types::{
    Article, Category, DatabaseError, IncomingArticle, UnknownCategory, UserPreferences,
};

use anyhow::Result;

use super::schema::Database;
use super::types::{PreferencesDbRow, UserPreferences};

impl Database {
    // ========================================================================
    // User Preferences Operations
    // ========================================================================

    /// Get the preferences record for `user_id`, or `None` if never created.
    pub async fn get_user_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        let row = sqlx::query_as::<_, PreferencesDbRow>(
            r#"
            SELECT user_id, preferred_categories, preferred_sources, text_size, dark_mode
            FROM user_preferences
            WHERE user_id = ?
        "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PreferencesDbRow::into_preferences))
    }

    /// Write a preferences record (UPSERT).
    ///
    /// Inserts the record if the user has none yet, or replaces every field
    /// and the update timestamp of the existing one.
    pub async fn save_user_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        let categories = serde_json::to_string(&prefs.preferred_categories)?;
        let sources = serde_json::to_string(&prefs.preferred_sources)?;

        sqlx::query(
            r#"
            INSERT INTO user_preferences
                (user_id, preferred_categories, preferred_sources, text_size, dark_mode, updated_at)
            VALUES (?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(user_id) DO UPDATE SET
                preferred_categories = excluded.preferred_categories,
                preferred_sources = excluded.preferred_sources,
                text_size = excluded.text_size,
                dark_mode = excluded.dark_mode,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(&prefs.user_id)
        .bind(categories)
        .bind(sources)
        .bind(i64::from(prefs.text_size))
        .bind(prefs.dark_mode)
        .execute(&self.pool)
        .await?;

        self.notify_changed();
        Ok(())
    }

    /// Return the user's preferences, creating the default record first if
    /// none exists.
    ///
    /// Uses `INSERT OR IGNORE` so two callers racing on first use both end
    /// up reading the same single row.
    pub async fn get_or_create_user_preferences(&self, user_id: &str) -> Result<UserPreferences> {
        let defaults = UserPreferences::with_defaults(user_id);
        let categories = serde_json::to_string(&defaults.preferred_categories)?;
        let sources = serde_json::to_string(&defaults.preferred_sources)?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO user_preferences
                (user_id, preferred_categories, preferred_sources, text_size, dark_mode)
            VALUES (?, ?, ?, ?, ?)
        "#,
        )
        .bind(user_id)
        .bind(categories)
        .bind(sources)
        .bind(i64::from(defaults.text_size))
        .bind(defaults.dark_mode)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(user_id = %user_id, "Created default user preferences");
            self.notify_changed();
            return Ok(defaults);
        }

        self.get_user_preferences(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("preferences for {user_id} vanished after insert"))
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Category, Database, UserPreferences};
    use std::collections::BTreeSet;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_user_preferences_missing() {
        let db = test_db().await;
        let prefs = db.get_user_preferences("nobody").await.unwrap();
        assert_eq!(prefs, None);
    }

    #[tokio::test]
    async fn test_save_and_get_user_preferences() {
        let db = test_db().await;
        let prefs = UserPreferences {
            user_id: "user_1".to_string(),
            preferred_categories: BTreeSet::from([Category::Science, Category::Health]),
            preferred_sources: BTreeSet::from(["BBC News".to_string()]),
            text_size: 20,
            dark_mode: true,
        };
        db.save_user_preferences(&prefs).await.unwrap();

        let loaded = db.get_user_preferences("user_1").await.unwrap();
        assert_eq!(loaded, Some(prefs));
    }

    #[tokio::test]
    async fn test_save_user_preferences_upsert() {
        let db = test_db().await;
        let mut prefs = UserPreferences::with_defaults("user_1");
        db.save_user_preferences(&prefs).await.unwrap();

        prefs.preferred_categories = BTreeSet::from([Category::Sports]);
        db.save_user_preferences(&prefs).await.unwrap();

        let loaded = db.get_user_preferences("user_1").await.unwrap().unwrap();
        assert_eq!(loaded.preferred_categories, BTreeSet::from([Category::Sports]));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_preferences")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_get_or_create_creates_defaults_once() {
        let db = test_db().await;
        let created = db.get_or_create_user_preferences("user_1").await.unwrap();
        assert_eq!(created, UserPreferences::with_defaults("user_1"));

        let mut changed = created.clone();
        changed.dark_mode = true;
        db.save_user_preferences(&changed).await.unwrap();

        // Existing record is returned untouched
        let again = db.get_or_create_user_preferences("user_1").await.unwrap();
        assert!(again.dark_mode);
    }

    #[tokio::test]
    async fn test_preferences_are_per_user() {
        let db = test_db().await;
        let mut alice = UserPreferences::with_defaults("alice");
        alice.preferred_sources.insert("Reuters".to_string());
        db.save_user_preferences(&alice).await.unwrap();

        assert!(db.get_user_preferences("bob").await.unwrap().is_none());
        let loaded = db.get_user_preferences("alice").await.unwrap().unwrap();
        assert!(loaded.preferred_sources.contains("Reuters"));
    }

    #[tokio::test]
    async fn test_save_notifies_subscribers() {
        let db = test_db().await;
        let rx = db.subscribe();
        db.save_user_preferences(&UserPreferences::with_defaults("user_1"))
            .await
            .unwrap();
        assert!(rx.has_changed().unwrap());
    }
}

use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{
    ApiToken, FeedItem, NewFeedItem, RefreshSetting, Role, Subscription, User,
    DEFAULT_REFRESH_INTERVAL_MINUTES,
};

use super::schema::SCHEMA;

/// The single shared handle to the SQLite store. All mutation from the
/// scheduler and from request handlers goes through this one value; there is
/// no global connection.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Item operations

    /// Dedup check: has this (link, feed_url) pair been ingested before?
    pub async fn item_exists(&self, link: &str, feed_url: &str) -> Result<bool> {
        let link = link.to_string();
        let feed_url = feed_url.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM items WHERE link = ?1 AND feed_url = ?2)",
                    params![link, feed_url],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await?;
        Ok(exists)
    }

    /// Insert-if-absent. Returns true if a row was inserted, false if the
    /// (link, feed_url) pair was already present. Concurrent ingestions of a
    /// shared feed URL race harmlessly on the unique constraint.
    pub async fn insert_item(&self, item: NewFeedItem) -> Result<bool> {
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT OR IGNORE INTO items (title, link, published_at, source, description, feed_url)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    params![
                        item.title,
                        item.link,
                        item.published_at,
                        item.source,
                        item.description,
                        item.feed_url,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(inserted)
    }

    pub async fn count_items(&self, feed_urls: &[String]) -> Result<u64> {
        if feed_urls.is_empty() {
            return Ok(0);
        }

        let urls = feed_urls.to_vec();
        let count = self
            .conn
            .call(move |conn| {
                let query = format!(
                    "SELECT COUNT(*) FROM items WHERE feed_url IN ({})",
                    placeholders(urls.len())
                );
                let count: i64 =
                    conn.query_row(&query, params_from_iter(urls.iter()), |row| row.get(0))?;
                Ok(count as u64)
            })
            .await?;
        Ok(count)
    }

    /// Items for the given feed URLs, newest first. Ties on publish date are
    /// broken by rowid so pagination slices never overlap.
    pub async fn list_items(
        &self,
        feed_urls: &[String],
        limit: u32,
        offset: u64,
    ) -> Result<Vec<FeedItem>> {
        if feed_urls.is_empty() {
            return Ok(Vec::new());
        }

        let urls = feed_urls.to_vec();
        let items = self
            .conn
            .call(move |conn| {
                let query = format!(
                    r#"SELECT title, link, published_at, source, description, feed_url
                       FROM items WHERE feed_url IN ({})
                       ORDER BY published_at DESC, id DESC LIMIT ? OFFSET ?"#,
                    placeholders(urls.len())
                );
                let mut stmt = conn.prepare(&query)?;

                let mut args: Vec<Box<dyn ToSql>> = Vec::with_capacity(urls.len() + 2);
                for url in &urls {
                    args.push(Box::new(url.clone()));
                }
                args.push(Box::new(limit as i64));
                args.push(Box::new(offset as i64));

                let items = stmt
                    .query_map(params_from_iter(args.iter().map(|a| a.as_ref())), |row| {
                        Ok(item_from_row(row))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    /// Items with publish date in the half-open window `[start, end)`. The
    /// bounds must be in the same canonical RFC 3339 UTC form the normalizer
    /// stores, so plain string comparison is a date comparison.
    pub async fn list_items_in_range(
        &self,
        feed_urls: &[String],
        start: &str,
        end: &str,
    ) -> Result<Vec<FeedItem>> {
        if feed_urls.is_empty() {
            return Ok(Vec::new());
        }

        let urls = feed_urls.to_vec();
        let start = start.to_string();
        let end = end.to_string();
        let items = self
            .conn
            .call(move |conn| {
                let query = format!(
                    r#"SELECT title, link, published_at, source, description, feed_url
                       FROM items WHERE feed_url IN ({})
                       AND published_at >= ? AND published_at < ?
                       ORDER BY published_at DESC, id DESC"#,
                    placeholders(urls.len())
                );
                let mut stmt = conn.prepare(&query)?;

                let mut args: Vec<Box<dyn ToSql>> = Vec::with_capacity(urls.len() + 2);
                for url in &urls {
                    args.push(Box::new(url.clone()));
                }
                args.push(Box::new(start.clone()));
                args.push(Box::new(end.clone()));

                let items = stmt
                    .query_map(params_from_iter(args.iter().map(|a| a.as_ref())), |row| {
                        Ok(item_from_row(row))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    // User operations

    pub async fn add_user(&self, username: &str, role: Role) -> Result<i64> {
        let username = username.to_string();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (username, role) VALUES (?1, ?2)",
                    params![username, role.as_str()],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_all_users(&self) -> Result<Vec<User>> {
        let users = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, username, role FROM users ORDER BY id")?;
                let users = stmt
                    .query_map([], |row| Ok(user_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(users)
            })
            .await?;
        Ok(users)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let username = username.to_string();
        let user = self
            .conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT id, username, role FROM users WHERE username = ?1",
                        params![username],
                        |row| Ok(user_from_row(row)),
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    pub async fn get_user_role(&self, user_id: i64) -> Result<Option<Role>> {
        let role = self
            .conn
            .call(move |conn| {
                let role: Option<String> = conn
                    .query_row(
                        "SELECT role FROM users WHERE id = ?1",
                        params![user_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(role)
            })
            .await?;
        Ok(role.and_then(|r| Role::parse(&r)))
    }

    pub async fn set_user_role(&self, user_id: i64, role: Role) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE users SET role = ?1 WHERE id = ?2",
                    params![role.as_str(), user_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Subscription operations

    pub async fn add_subscription(
        &self,
        user_id: i64,
        feed_url: &str,
        title: &str,
        tags: &str,
    ) -> Result<i64> {
        let feed_url = feed_url.to_string();
        let title = title.to_string();
        let tags = tags.to_string();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO user_feeds (user_id, feed_url, title, category) VALUES (?1, ?2, ?3, ?4)",
                    params![user_id, feed_url, title, tags],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn remove_subscription(&self, user_id: i64, subscription_id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM user_feeds WHERE id = ?1 AND user_id = ?2",
                    params![subscription_id, user_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_subscriptions(&self, user_id: i64) -> Result<Vec<Subscription>> {
        let subs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, feed_url, title, category FROM user_feeds WHERE user_id = ?1 ORDER BY id",
                )?;
                let subs = stmt
                    .query_map(params![user_id], |row| Ok(subscription_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subs)
            })
            .await?;
        Ok(subs)
    }

    pub async fn get_user_feed_urls(&self, user_id: i64) -> Result<Vec<String>> {
        let urls = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT feed_url FROM user_feeds WHERE user_id = ?1 ORDER BY id")?;
                let urls = stmt
                    .query_map(params![user_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(urls)
            })
            .await?;
        Ok(urls)
    }

    // Refresh setting operations

    /// The user's configured interval, or the default when no row exists.
    pub async fn get_refresh_interval(&self, user_id: i64) -> Result<i64> {
        let interval = self
            .conn
            .call(move |conn| {
                let interval: Option<i64> = conn
                    .query_row(
                        "SELECT interval_minutes FROM user_refresh_settings WHERE user_id = ?1",
                        params![user_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(interval)
            })
            .await?;
        Ok(interval.unwrap_or(DEFAULT_REFRESH_INTERVAL_MINUTES))
    }

    pub async fn set_refresh_interval(&self, user_id: i64, interval_minutes: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO user_refresh_settings (user_id, interval_minutes)
                       VALUES (?1, ?2)
                       ON CONFLICT(user_id) DO UPDATE SET interval_minutes = excluded.interval_minutes"#,
                    params![user_id, interval_minutes],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_refresh_setting(&self, user_id: i64) -> Result<RefreshSetting> {
        let setting = self
            .conn
            .call(move |conn| {
                let setting = conn
                    .query_row(
                        r#"SELECT interval_minutes, last_run_ts, next_due_ts
                           FROM user_refresh_settings WHERE user_id = ?1"#,
                        params![user_id],
                        |row| {
                            Ok(RefreshSetting {
                                interval_minutes: row.get(0)?,
                                last_run: row.get(1)?,
                                next_due: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(setting)
            })
            .await?;
        Ok(setting.unwrap_or_default())
    }

    /// Record a completed scheduled run: last-run = now, next-due = now +
    /// interval. Upserts so the row appears on the first successful run.
    pub async fn set_last_run(&self, user_id: i64, now_ts: i64, interval_minutes: i64) -> Result<()> {
        let next_ts = now_ts + interval_minutes * 60;
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO user_refresh_settings (user_id, interval_minutes, last_run_ts, next_due_ts)
                       VALUES (?1, ?2, ?3, ?4)
                       ON CONFLICT(user_id) DO UPDATE SET
                           interval_minutes = excluded.interval_minutes,
                           last_run_ts = excluded.last_run_ts,
                           next_due_ts = excluded.next_due_ts"#,
                    params![user_id, interval_minutes, now_ts, next_ts],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Token operations

    pub async fn insert_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: i64,
        permissions: i64,
    ) -> Result<()> {
        let token = token.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO api_tokens (user_id, token, expires_at, permissions) VALUES (?1, ?2, ?3, ?4)",
                    params![user_id, token, expires_at, permissions],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_token(&self, token: &str) -> Result<Option<ApiToken>> {
        let token = token.to_string();
        let info = self
            .conn
            .call(move |conn| {
                let info = conn
                    .query_row(
                        "SELECT id, user_id, token, expires_at, permissions FROM api_tokens WHERE token = ?1",
                        params![token],
                        |row| {
                            Ok(ApiToken {
                                id: row.get(0)?,
                                user_id: row.get(1)?,
                                token: row.get(2)?,
                                expires_at: row.get(3)?,
                                permissions: row.get(4)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(info)
            })
            .await?;
        Ok(info)
    }

    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        let token = token.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM api_tokens WHERE token = ?1", params![token])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn item_from_row(row: &Row) -> FeedItem {
    FeedItem {
        title: row.get(0).unwrap(),
        link: row.get(1).unwrap(),
        published_at: row.get(2).unwrap(),
        source: row.get(3).unwrap(),
        description: row.get(4).unwrap(),
        feed_url: row.get(5).unwrap(),
    }
}

fn user_from_row(row: &Row) -> User {
    User {
        id: row.get(0).unwrap(),
        username: row.get(1).unwrap(),
        role: Role::parse(&row.get::<_, String>(2).unwrap()).unwrap_or(Role::User),
    }
}

fn subscription_from_row(row: &Row) -> Subscription {
    Subscription {
        id: row.get(0).unwrap(),
        user_id: row.get(1).unwrap(),
        feed_url: row.get(2).unwrap(),
        title: row.get(3).unwrap(),
        tags: row.get(4).unwrap(),
    }
}

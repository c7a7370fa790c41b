pub const SCHEMA: &str = r#"
-- items table: one row per ingested article, shared across users
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    link TEXT NOT NULL,
    published_at TEXT NOT NULL,
    source TEXT NOT NULL,
    description TEXT NOT NULL,
    feed_url TEXT NOT NULL,
    UNIQUE(link, feed_url)
);

CREATE INDEX IF NOT EXISTS idx_items_feed_url_published ON items(feed_url, published_at DESC);

-- users table
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL DEFAULT 'user' CHECK( role IN ('user', 'admin', 'blocked') ),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- user_feeds table: per-user subscriptions
CREATE TABLE IF NOT EXISTS user_feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    feed_url TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_user_feeds_user_id ON user_feeds(user_id);

-- user_refresh_settings table: one row per user, upserted
CREATE TABLE IF NOT EXISTS user_refresh_settings (
    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    interval_minutes INTEGER NOT NULL DEFAULT 60,
    last_run_ts INTEGER,
    next_due_ts INTEGER
);

-- api_tokens table
CREATE TABLE IF NOT EXISTS api_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token TEXT NOT NULL UNIQUE,
    expires_at INTEGER NOT NULL,
    permissions INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_api_tokens_token ON api_tokens(token);
"#;

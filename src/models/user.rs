use serde::{Deserialize, Serialize};

pub const DEFAULT_REFRESH_INTERVAL_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    Blocked,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            "blocked" => Some(Role::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

/// A user's subscription to one feed URL.
///
/// `title` overrides the feed's own title in item listings when non-empty.
/// `tags` is a comma-separated category list, matching the stored form.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub feed_url: String,
    pub title: String,
    pub tags: String,
}

impl Subscription {
    /// Tags split out of the stored comma-separated form, trimmed, empties
    /// dropped.
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn has_tag(&self, target: &str) -> bool {
        let target = target.trim();
        if target.is_empty() {
            return false;
        }
        self.tag_list()
            .iter()
            .any(|t| t.eq_ignore_ascii_case(target))
    }
}

/// Per-user scheduling state. Timestamps are unix epoch seconds; `None`
/// means the scheduler has never run for this user.
#[derive(Debug, Clone, Copy)]
pub struct RefreshSetting {
    pub interval_minutes: i64,
    pub last_run: Option<i64>,
    pub next_due: Option<i64>,
}

impl Default for RefreshSetting {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_REFRESH_INTERVAL_MINUTES,
            last_run: None,
            next_due: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiToken {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub expires_at: i64,
    pub permissions: i64,
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::db::Repository;
use crate::error::Result;
use crate::feed::Ingestor;
use crate::models::{RefreshSetting, User};

/// Where one user stands in the refresh cycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// interval == 0, autofetch off.
    Disabled,
    /// next-due is in the future.
    Waiting,
    /// next-due has arrived or was never set.
    Due,
}

/// Pure evaluation of a user's scheduling state. A user whose next-due was
/// never recorded is due on first sight.
pub fn evaluate(setting: &RefreshSetting, now_ts: i64) -> RefreshState {
    if setting.interval_minutes == 0 {
        return RefreshState::Disabled;
    }

    match setting.next_due {
        None => RefreshState::Due,
        Some(due) if now_ts >= due => RefreshState::Due,
        Some(_) => RefreshState::Waiting,
    }
}

/// The recurring per-user refresh loop. Each tick enumerates all users,
/// evaluates each one independently, and runs ingestion for those that are
/// due. No user's failure stops evaluation of the rest.
pub struct Scheduler {
    repo: Arc<Repository>,
    ingestor: Arc<Ingestor>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(repo: Arc<Repository>, ingestor: Arc<Ingestor>, tick: Duration) -> Self {
        Self { repo, ingestor, tick }
    }

    /// Runs until the shutdown signal fires. A tick in progress is allowed
    /// to finish; partial batches are fine because all writes are
    /// insert-if-absent.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tracing::debug!("refresh scheduler tick");
                    if let Err(e) = self.tick_once().await {
                        tracing::error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("refresh scheduler stopping");
                    break;
                }
            }
        }
    }

    async fn tick_once(&self) -> Result<()> {
        let users = self.repo.get_all_users().await?;

        for user in users {
            if let Err(e) = self.refresh_user(&user).await {
                tracing::error!(user_id = user.id, error = %e, "user refresh failed");
            }
        }

        Ok(())
    }

    async fn refresh_user(&self, user: &User) -> Result<()> {
        let setting = self.repo.get_refresh_setting(user.id).await?;
        let now_ts = Utc::now().timestamp();

        match evaluate(&setting, now_ts) {
            RefreshState::Disabled => {
                tracing::debug!(user_id = user.id, username = %user.username, "autofetch is disabled");
                return Ok(());
            }
            RefreshState::Waiting => return Ok(()),
            RefreshState::Due => {}
        }

        let urls = self.repo.get_user_feed_urls(user.id).await?;

        // A user without feeds stays due, so the first added feed is picked
        // up on the next tick instead of after a full interval.
        if urls.is_empty() {
            tracing::debug!(user_id = user.id, "no subscribed feeds, leaving timestamps untouched");
            return Ok(());
        }

        tracing::info!(user_id = user.id, username = %user.username, feeds = urls.len(), "refreshing user feeds");
        let report = self.ingestor.ingest(&urls).await;
        tracing::info!(
            user_id = user.id,
            fetched = report.urls_fetched,
            failed = report.urls_failed,
            inserted = report.items_inserted,
            "user refresh complete"
        );

        self.repo
            .set_last_run(user.id, now_ts, setting.interval_minutes)
            .await
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use tokio::sync::watch;

mod api;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod query;
mod scheduler;

use api::ApiState;
use config::Config;
use db::Repository;
use error::{AppError, Result};
use feed::{FeedFetcher, Ingestor};
use models::{Role, User};
use query::QueryService;
use scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let config = Config::load()?;

    let repo = Arc::new(Repository::new(&config.db_path).await?);
    let ingestor = Arc::new(Ingestor::new(Box::new(FeedFetcher::new()), repo.clone()));

    // Admin commands run against the store and exit without serving.
    if args.len() >= 2 {
        run_command(&repo, &ingestor, &args[1..]).await?;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(
        repo.clone(),
        ingestor.clone(),
        Duration::from_secs(config.scheduler_tick_secs),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    let state = Arc::new(ApiState {
        query: QueryService::new(repo.clone()),
        ingestor,
        repo,
    });

    let listener = tokio::net::TcpListener::bind(&config.api_addr).await?;
    tracing::info!(addr = %config.api_addr, "token API listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Stop the scheduler and let any in-flight batch finish.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;

    Ok(())
}

async fn run_command(repo: &Arc<Repository>, ingestor: &Arc<Ingestor>, args: &[String]) -> Result<()> {
    let arg = |i: usize| args.get(i).map(String::as_str);

    match (arg(0), arg(1)) {
        (Some("--add-user"), Some(username)) => {
            let id = repo.add_user(username, Role::User).await?;
            println!("created user {username} (id {id})");
        }
        (Some("--block-user"), Some(username)) => {
            let user = lookup_user(repo, username).await?;
            repo.set_user_role(user.id, Role::Blocked).await?;
            println!("blocked {username}");
        }
        (Some("--unblock-user"), Some(username)) => {
            let user = lookup_user(repo, username).await?;
            repo.set_user_role(user.id, Role::User).await?;
            println!("unblocked {username}");
        }
        (Some("--add-feed"), Some(username)) => {
            let user = lookup_user(repo, username).await?;
            let url = arg(2).ok_or_else(|| AppError::InvalidRequest("feed URL is required".to_string()))?;
            let title = arg(3).unwrap_or_default();
            let tags = arg(4).unwrap_or_default();
            let id = repo.add_subscription(user.id, url, title, tags).await?;
            println!("subscribed {username} to {url} (feed id {id})");
        }
        (Some("--remove-feed"), Some(username)) => {
            let user = lookup_user(repo, username).await?;
            let feed_id: i64 = arg(2)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| AppError::InvalidRequest("feed id is required".to_string()))?;
            repo.remove_subscription(user.id, feed_id).await?;
            println!("removed feed {feed_id} for {username}");
        }
        (Some("--set-interval"), Some(username)) => {
            let user = lookup_user(repo, username).await?;
            let minutes: i64 = arg(2)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| AppError::InvalidRequest("interval in minutes is required".to_string()))?;
            repo.set_refresh_interval(user.id, minutes).await?;
            println!("refresh interval for {username} set to {minutes} minutes");
        }
        (Some("--mint-token"), Some(username)) => {
            let user = lookup_user(repo, username).await?;
            let days: u64 = arg(2).and_then(|s| s.parse().ok()).unwrap_or(365);
            let token =
                api::create_token(repo, user.id, 0, Duration::from_secs(days * 24 * 60 * 60)).await?;
            println!("{token}");
        }
        (Some("--refresh"), Some(username)) => {
            let user = lookup_user(repo, username).await?;
            let urls = repo.get_user_feed_urls(user.id).await?;
            let report = ingestor.ingest(&urls).await;
            println!(
                "refreshed {} feeds ({} failed, {} new items)",
                report.urls_fetched, report.urls_failed, report.items_inserted
            );
        }
        (Some("--list"), Some(username)) => {
            let user = lookup_user(repo, username).await?;
            list_items(repo, &user, arg(2), arg(3), arg(4)).await?;
        }
        _ => {
            eprintln!("usage: feedspool [COMMAND]");
            eprintln!("  --add-user NAME");
            eprintln!("  --block-user NAME | --unblock-user NAME");
            eprintln!("  --add-feed NAME URL [TITLE] [TAGS]");
            eprintln!("  --remove-feed NAME FEED_ID");
            eprintln!("  --set-interval NAME MINUTES");
            eprintln!("  --mint-token NAME [DAYS]");
            eprintln!("  --refresh NAME");
            eprintln!("  --list NAME [PAGE] [PER_PAGE] [TAG]");
        }
    }

    Ok(())
}

async fn lookup_user(repo: &Repository, username: &str) -> Result<User> {
    repo.get_user_by_username(username)
        .await?
        .ok_or_else(|| AppError::InvalidRequest(format!("no such user: {username}")))
}

async fn list_items(
    repo: &Arc<Repository>,
    user: &User,
    page: Option<&str>,
    per_page: Option<&str>,
    tag: Option<&str>,
) -> Result<()> {
    let query = QueryService::new(repo.clone());

    let subscriptions = repo.get_subscriptions(user.id).await?;
    let tags = query::collect_tags(&subscriptions);
    let filtered = query::filter_subscriptions(&subscriptions, tag.unwrap_or_default(), "");
    let urls: Vec<String> = filtered.iter().map(|s| s.feed_url.clone()).collect();

    let pagination = query::Pagination::clamped(
        page.and_then(|s| s.parse().ok()).unwrap_or(0),
        per_page.and_then(|s| s.parse().ok()).unwrap_or(0),
    );

    let mut page = query.page(&urls, pagination).await?;
    query::apply_title_overrides(&mut page.items, &subscriptions);

    println!("subscriptions:");
    for sub in &subscriptions {
        println!("  [{}] {} {}", sub.id, sub.feed_url, sub.title);
    }
    if !tags.is_empty() {
        println!("tags: {}", tags.join(", "));
    }

    let setting = repo.get_refresh_setting(user.id).await?;
    println!(
        "last refresh: {}  next refresh: {}",
        format_epoch(setting.last_run),
        format_epoch(setting.next_due)
    );

    println!(
        "page {}/{} ({} items total)",
        page.page, page.total_pages, page.total_items
    );
    for item in &page.items {
        println!("{}  {}  {}  {}", item.published_at, item.source, item.title, item.link);
    }

    Ok(())
}

fn format_epoch(ts: Option<i64>) -> String {
    ts.and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|dt| feed::format_timestamp(dt))
        .unwrap_or_else(|| "never".to_string())
}

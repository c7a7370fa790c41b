use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Local, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::db::Repository;
use crate::error::AppError;
use crate::feed::{format_timestamp, Ingestor};
use crate::models::FeedItem;
use crate::query::{apply_title_overrides, validate_limit, Period, QueryService};

use super::token::resolve_user;

pub const MAX_API_ITEMS: i64 = 1000;

pub struct ApiState {
    pub repo: Arc<Repository>,
    pub query: QueryService,
    pub ingestor: Arc<Ingestor>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/feeds", get(feeds_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/events", get(events_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedParams {
    pub period: Option<String>,
    pub limit: Option<i64>,
}

/// The response shape external tool-calling clients depend on; field names
/// and presence rules are a compatibility contract.
#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub items: Vec<FeedItem>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    pub generated_at: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub status: &'static str,
    pub urls: usize,
    pub items_inserted: usize,
}

struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            e => {
                tracing::error!(error = %e, "api request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Token from `X-Api-Token` or `Authorization: Bearer ...`.
fn token_from_headers(headers: &HeaderMap) -> String {
    if let Some(token) = headers
        .get("x-api-token")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return token.to_string();
    }

    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let mut parts = auth.trim().splitn(2, ' ');
        if let (Some(scheme), Some(value)) = (parts.next(), parts.next()) {
            if scheme.eq_ignore_ascii_case("bearer") {
                let token = value.trim();
                if !token.is_empty() {
                    return token.to_string();
                }
            }
        }
    }

    String::new()
}

async fn feeds_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> Result<Json<FeedResponse>, ApiError> {
    let token = token_from_headers(&headers);
    let response = feeds_response(&state, &token, &params).await?;
    Ok(Json(response))
}

/// The feeds operation proper, separated from the HTTP plumbing.
async fn feeds_response(
    state: &ApiState,
    token: &str,
    params: &FeedParams,
) -> Result<FeedResponse, AppError> {
    let user_id = resolve_user(&state.repo, token, Utc::now().timestamp()).await?;

    let subscriptions = state.repo.get_subscriptions(user_id).await?;
    let urls: Vec<String> = subscriptions.iter().map(|s| s.feed_url.clone()).collect();

    let (mut items, period, limit) = match (&params.period, params.limit) {
        (Some(period_str), _) => {
            let Some(period) = Period::parse(period_str) else {
                return Err(AppError::InvalidRequest("invalid period".to_string()));
            };
            let items = state
                .query
                .list_items_in_period(&urls, period, Local::now())
                .await?;
            (items, Some(period.as_str()), None)
        }
        (None, Some(limit)) => {
            let limit = validate_limit(limit, MAX_API_ITEMS)?;
            let items = state.query.list_items(&urls, limit, 0).await?;
            (items, None, Some(limit as i64))
        }
        (None, None) => {
            return Err(AppError::InvalidRequest(
                "either period or limit is required".to_string(),
            ));
        }
    };

    apply_title_overrides(&mut items, &subscriptions);

    Ok(FeedResponse {
        count: items.len(),
        items,
        period,
        limit,
        generated_at: format_timestamp(Utc::now()),
    })
}

/// Manual refresh: ingest the calling user's feeds right now. Scheduler
/// bookkeeping (last-run / next-due) is left alone, so the automatic cycle
/// keeps its cadence.
async fn refresh_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<RefreshResponse>, ApiError> {
    let token = token_from_headers(&headers);
    let user_id = resolve_user(&state.repo, &token, Utc::now().timestamp()).await?;

    let urls = state.repo.get_user_feed_urls(user_id).await?;
    let report = state.ingestor.ingest(&urls).await;

    Ok(Json(RefreshResponse {
        status: "ok",
        urls: urls.len(),
        items_inserted: report.items_inserted,
    }))
}

/// Heartbeat event stream. The stream only produces while the connection is
/// alive; a disconnect drops it and the interval with it.
async fn events_handler() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_secs(1));
    let stream = futures::stream::unfold(interval, |mut interval| async move {
        interval.tick().await;
        let payload = serde_json::json!({
            "type": "heartbeat",
            "timestamp": format_timestamp(Utc::now()),
        });
        Some((Ok(Event::default().data(payload.to_string())), interval))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as AppResult;
    use crate::feed::FetchFeed;
    use crate::models::{FetchedFeed, Role};
    use async_trait::async_trait;
    use axum::http::HeaderValue;

    struct NoFetcher;

    #[async_trait]
    impl FetchFeed for NoFetcher {
        async fn fetch(&self, _url: &str) -> AppResult<FetchedFeed> {
            Err(AppError::Other(anyhow::anyhow!("offline")))
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*k).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn token_comes_from_either_header() {
        assert_eq!(token_from_headers(&headers(&[("x-api-token", "abc")])), "abc");
        assert_eq!(
            token_from_headers(&headers(&[("authorization", "Bearer xyz")])),
            "xyz"
        );
        assert_eq!(
            token_from_headers(&headers(&[("authorization", "bearer xyz")])),
            "xyz"
        );
        assert_eq!(token_from_headers(&headers(&[("authorization", "Basic xyz")])), "");
        assert_eq!(token_from_headers(&HeaderMap::new()), "");
        // Explicit header wins over Authorization.
        assert_eq!(
            token_from_headers(&headers(&[("x-api-token", "a"), ("authorization", "Bearer b")])),
            "a"
        );
    }

    async fn api_fixture() -> (tempfile::TempDir, Arc<ApiState>, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let repo = Arc::new(Repository::new(path.to_str().unwrap()).await.unwrap());
        let uid = repo.add_user("dave", Role::User).await.unwrap();
        repo.add_subscription(uid, "https://example.com/rss", "", "")
            .await
            .unwrap();
        repo.insert_token(uid, "valid-token", i64::MAX, 0).await.unwrap();

        for i in 0..15 {
            repo.insert_item(crate::models::NewFeedItem {
                title: format!("post {i}"),
                link: format!("https://example.com/{i}"),
                published_at: format!("2026-08-01T10:00:{i:02}Z"),
                source: "Example".to_string(),
                description: String::new(),
                feed_url: "https://example.com/rss".to_string(),
            })
            .await
            .unwrap();
        }

        let state = Arc::new(ApiState {
            query: QueryService::new(repo.clone()),
            ingestor: Arc::new(Ingestor::new(Box::new(NoFetcher), repo.clone())),
            repo,
        });
        (dir, state, "valid-token".to_string())
    }

    #[tokio::test]
    async fn limit_over_the_cap_is_a_client_error() {
        let (_dir, state, token) = api_fixture().await;
        let params = FeedParams {
            period: None,
            limit: Some(1500),
        };
        assert!(matches!(
            feeds_response(&state, &token, &params).await,
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn latest_n_returns_newest_first() {
        let (_dir, state, token) = api_fixture().await;
        let params = FeedParams {
            period: None,
            limit: Some(10),
        };
        let response = feeds_response(&state, &token, &params).await.unwrap();
        assert_eq!(response.count, 10);
        assert_eq!(response.limit, Some(10));
        assert_eq!(response.period, None);
        assert_eq!(response.items[0].link, "https://example.com/14");
        assert!(response.items.windows(2).all(|w| w[0].published_at >= w[1].published_at));
    }

    #[tokio::test]
    async fn unknown_period_and_missing_params_are_client_errors() {
        let (_dir, state, token) = api_fixture().await;

        let bad_period = FeedParams {
            period: Some("tomorrow".to_string()),
            limit: None,
        };
        assert!(matches!(
            feeds_response(&state, &token, &bad_period).await,
            Err(AppError::InvalidRequest(_))
        ));

        let nothing = FeedParams::default();
        assert!(matches!(
            feeds_response(&state, &token, &nothing).await,
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn bad_token_is_unauthorized() {
        let (_dir, state, _token) = api_fixture().await;
        let params = FeedParams {
            period: None,
            limit: Some(10),
        };
        assert!(matches!(
            feeds_response(&state, "wrong", &params).await,
            Err(AppError::Unauthorized(_))
        ));
    }
}

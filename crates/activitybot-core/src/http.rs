use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::Utc;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::{
    leaderboard::{LeaderboardPage, NoDirectory},
    tracker::ActivityTracker,
    types::{Badge, UserReport},
};

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<ActivityTracker>,
    pub page_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// One-based, like the footer of a render.
    #[serde(default = "default_page")]
    pub page: usize,
}

fn default_page() -> usize {
    1
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/leaderboard", get(api_leaderboard))
        .route("/api/users/{user_id}", get(api_user))
        .route("/api/badges", get(api_badges))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> &'static str {
    "Activity leaderboard API"
}

async fn health() -> &'static str {
    "ok"
}

async fn api_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<LeaderboardPage>, (StatusCode, String)> {
    let now = Utc::now();
    let source = state
        .tracker
        .leaderboard_source(now)
        .await
        .map_err(internal_error)?;

    let page = query.page.saturating_sub(1);
    let last_page = source.total_pages(state.page_size).saturating_sub(1);
    if page > last_page {
        return Err((
            StatusCode::NOT_FOUND,
            format!("page {} does not exist", query.page),
        ));
    }

    Ok(Json(source.render(page, state.page_size, &NoDirectory, now)))
}

async fn api_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserReport>, (StatusCode, String)> {
    state
        .tracker
        .user_report(&user_id)
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no activity for user {user_id}")))
}

async fn api_badges(
    State(state): State<AppState>,
) -> Result<Json<Vec<Badge>>, (StatusCode, String)> {
    let catalog = state
        .tracker
        .store()
        .badge_catalog()
        .await
        .map_err(internal_error)?;
    Ok(Json(catalog))
}

fn internal_error(error: anyhow::Error) -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("internal error: {error}"),
    )
}

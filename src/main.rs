mod charts;
mod error;
mod models;
mod storage;
mod user_models;
mod user_storage;
mod validation;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use error::{ApiError, Result};
use models::{
    HomeResponse, Subject, SubjectListResponse, SubjectPayload, Tag, TagListResponse, TagPayload,
    TimeLog, TimeLogListResponse, TimeLogPayload, TimeLogView,
};
use storage::{paginate, TrackerStorage};
use user_models::{LoginPayload, LoginResponse, SignupPayload, User, UserResponse};
use user_storage::UserStorage;
use validation::{dates_between, resolve_date_range, TimeLogInput};

struct AppState {
    storage: TrackerStorage,
    users: UserStorage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("timetrack=info")),
        )
        .init();

    let data_dir = std::env::var("TIMETRACK_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let addr = std::env::var("TIMETRACK_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    let state = Arc::new(AppState {
        storage: TrackerStorage::new(&data_dir).context("initializing tracker storage")?,
        users: UserStorage::new(&data_dir).context("initializing user storage")?,
    });

    let app = Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/account", delete(delete_account))
        .route("/home", get(home))
        .route("/timelogs", get(list_timelogs).post(create_timelog))
        .route(
            "/timelogs/:id",
            get(get_timelog).put(update_timelog).delete(delete_timelog),
        )
        .route("/subjects", get(list_subjects).post(create_subject))
        .route(
            "/subjects/:id",
            get(get_subject).put(update_subject).delete(delete_subject),
        )
        .route("/tags", get(list_tags).post(create_tag))
        .route("/tags/:id", get(get_tag).put(update_tag).delete(delete_tag))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("timetrack server listening on http://{addr}");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized("missing bearer token"))
}

async fn current_user(state: &AppState, headers: &HeaderMap) -> Result<User> {
    state.users.user_for_token(bearer_token(headers)?).await
}

// Auth

async fn signup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignupPayload>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    let user = state
        .users
        .signup(&payload.username, &payload.email, &payload.password)
        .await?;
    tracing::info!(username = %user.username, "account created");
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<LoginResponse>> {
    let (token, user) = state.users.login(&payload.username, &payload.password).await?;
    tracing::debug!(username = %user.username, "login");
    Ok(Json(LoginResponse {
        token,
        username: user.username,
    }))
}

async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<StatusCode> {
    state.users.logout(bearer_token(&headers)?).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_account(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let user = current_user(&state, &headers).await?;
    state.storage.delete_user_data(&user.id).await?;
    state.users.delete_user(&user.id).await?;
    tracing::info!(username = %user.username, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

// Home / charts

#[derive(Deserialize)]
struct HomeQuery {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

async fn home(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HomeQuery>,
) -> Result<Json<HomeResponse>> {
    let user = current_user(&state, &headers).await?;

    let bounds = state.storage.date_bounds(&user.id).await?;
    // A range takes effect only when both ends are submitted.
    let submitted = match (query.start, query.end) {
        (Some(start), Some(end)) => Some((start, end)),
        _ => None,
    };
    let range = resolve_date_range(bounds, submitted)?;

    let (dates, logs_in_range) = match range {
        Some(range) => (
            dates_between(range.start, range.end),
            state
                .storage
                .timelogs_in_range(&user.id, range.start, range.end)
                .await?,
        ),
        None => (Vec::new(), Vec::new()),
    };

    // Oldest-first keeps dataset order stable as new records arrive.
    let mut subjects = state.storage.subjects_for_user(&user.id).await?;
    subjects.reverse();
    let mut tags = state.storage.tags_for_user(&user.id).await?;
    tags.reverse();

    let recent: Vec<TimeLog> = state
        .storage
        .timelogs_for_user(&user.id)
        .await?
        .into_iter()
        .take(10)
        .collect();
    let timelogs = timelog_views(&state, &user.id, recent).await?;

    Ok(Json(HomeResponse {
        min_date: range.map(|r| r.start),
        max_date: range.map(|r| r.end),
        date_based: charts::date_based_chart(&subjects, &logs_in_range, &dates),
        subject_based: charts::subject_based_chart(&subjects, &logs_in_range),
        tag_based: charts::tag_based_chart(&tags, &logs_in_range),
        timelogs,
    }))
}

// Time logs

#[derive(Deserialize)]
struct PageQuery {
    page: Option<usize>,
}

async fn list_timelogs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<Json<TimeLogListResponse>> {
    let user = current_user(&state, &headers).await?;
    let logs = state.storage.timelogs_for_user(&user.id).await?;
    let (page_items, page, total_pages) = paginate(&logs, query.page);
    let timelogs = timelog_views(&state, &user.id, page_items).await?;
    Ok(Json(TimeLogListResponse {
        timelogs,
        page,
        total_pages,
    }))
}

async fn create_timelog(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<TimeLogPayload>,
) -> Result<(StatusCode, Json<TimeLog>)> {
    let user = current_user(&state, &headers).await?;
    let log = state
        .storage
        .create_timelog(&user.id, timelog_input(payload))
        .await?;
    tracing::debug!(username = %user.username, date = %log.date, duration = log.duration, "time log recorded");
    Ok((StatusCode::CREATED, Json(log)))
}

async fn get_timelog(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TimeLogView>> {
    let user = current_user(&state, &headers).await?;
    let log = state.storage.get_timelog(&user.id, &id).await?;
    let mut views = timelog_views(&state, &user.id, vec![log]).await?;
    views
        .pop()
        .map(Json)
        .ok_or(ApiError::NotFound("time log"))
}

async fn update_timelog(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<TimeLogPayload>,
) -> Result<Json<TimeLog>> {
    let user = current_user(&state, &headers).await?;
    let log = state
        .storage
        .update_timelog(&user.id, &id, timelog_input(payload))
        .await?;
    Ok(Json(log))
}

async fn delete_timelog(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = current_user(&state, &headers).await?;
    state.storage.delete_timelog(&user.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn timelog_input(payload: TimeLogPayload) -> TimeLogInput {
    TimeLogInput {
        subject_id: payload.subject_id,
        tag_ids: payload.tag_ids,
        hours: payload.hours,
        minutes: payload.minutes,
        date: payload.date.unwrap_or_else(|| Utc::now().date_naive()),
        description: payload.description,
    }
}

async fn timelog_views(
    state: &AppState,
    user_id: &str,
    logs: Vec<TimeLog>,
) -> Result<Vec<TimeLogView>> {
    let subjects = state.storage.subjects_for_user(user_id).await?;
    let tags = state.storage.tags_for_user(user_id).await?;
    let subject_names: HashMap<&str, &str> = subjects
        .iter()
        .map(|s| (s.id.as_str(), s.name.as_str()))
        .collect();
    let tag_names: HashMap<&str, &str> =
        tags.iter().map(|t| (t.id.as_str(), t.name.as_str())).collect();

    Ok(logs
        .into_iter()
        .map(|log| TimeLogView {
            subject: subject_names
                .get(log.subject_id.as_str())
                .copied()
                .unwrap_or_default()
                .to_string(),
            tags: log
                .tag_ids
                .iter()
                .filter_map(|id| tag_names.get(id.as_str()).copied())
                .map(str::to_string)
                .collect(),
            id: log.id,
            date: log.date,
            duration: log.duration,
            description: log.description,
            last_modified: log.last_modified,
        })
        .collect())
}

// Subjects

async fn list_subjects(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<Json<SubjectListResponse>> {
    let user = current_user(&state, &headers).await?;
    let all = state.storage.subjects_for_user(&user.id).await?;
    let (subjects, page, total_pages) = paginate(&all, query.page);
    Ok(Json(SubjectListResponse {
        subjects,
        page,
        total_pages,
    }))
}

async fn create_subject(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SubjectPayload>,
) -> Result<(StatusCode, Json<Subject>)> {
    let user = current_user(&state, &headers).await?;
    let subject = state
        .storage
        .create_subject(&user.id, &payload.name, &payload.description)
        .await?;
    Ok((StatusCode::CREATED, Json(subject)))
}

async fn get_subject(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Subject>> {
    let user = current_user(&state, &headers).await?;
    Ok(Json(state.storage.get_subject(&user.id, &id).await?))
}

async fn update_subject(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<SubjectPayload>,
) -> Result<Json<Subject>> {
    let user = current_user(&state, &headers).await?;
    let subject = state
        .storage
        .update_subject(&user.id, &id, &payload.name, &payload.description)
        .await?;
    Ok(Json(subject))
}

async fn delete_subject(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = current_user(&state, &headers).await?;
    state.storage.delete_subject(&user.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Tags

async fn list_tags(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<Json<TagListResponse>> {
    let user = current_user(&state, &headers).await?;
    let all = state.storage.tags_for_user(&user.id).await?;
    let (tags, page, total_pages) = paginate(&all, query.page);
    Ok(Json(TagListResponse {
        tags,
        page,
        total_pages,
    }))
}

async fn create_tag(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<TagPayload>,
) -> Result<(StatusCode, Json<Tag>)> {
    let user = current_user(&state, &headers).await?;
    let tag = state.storage.create_tag(&user.id, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn get_tag(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Tag>> {
    let user = current_user(&state, &headers).await?;
    Ok(Json(state.storage.get_tag(&user.id, &id).await?))
}

async fn update_tag(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<TagPayload>,
) -> Result<Json<Tag>> {
    let user = current_user(&state, &headers).await?;
    let tag = state.storage.update_tag(&user.id, &id, &payload.name).await?;
    Ok(Json(tag))
}

async fn delete_tag(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = current_user(&state, &headers).await?;
    state.storage.delete_tag(&user.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

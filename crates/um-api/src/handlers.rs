//! # um-api Handlers
//!
//! This module coordinates the flow between HTTP requests and Core traits.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use um_config::PaginationConfig;
use um_core::error::AppError;
use um_core::models::{
    NewReply, NewRepost, NewThread, NewUser, PageRequest, ReplyId, RepostId, ThreadId, User, UserId,
    VoteTarget, VoteValue,
};
use um_core::traits::{AuthProvider, FollowRepo, ReplyStore, RepostRepo, ThreadRepo, UserRepo, VoteLedger};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery, AuthUser};

/// State shared across all request handlers.
pub struct AppState {
    pub users: Box<dyn UserRepo>,
    pub threads: Box<dyn ThreadRepo>,
    pub votes: Box<dyn VoteLedger>,
    pub replies: Box<dyn ReplyStore>,
    pub reposts: Box<dyn RepostRepo>,
    pub follows: Box<dyn FollowRepo>,
    pub auth: Box<dyn AuthProvider>,
    pub pagination: PaginationConfig,
}

type ApiResult<T> = Result<T, ApiError>;

// ── Pagination ──────────────────────────────────────────────────────────────

/// `page` defaults to 1 and `limit` to the configured default. A `limit` above
/// the configured maximum is capped, and the response echoes the effective one.
#[derive(Debug, Deserialize)]
pub struct PageParams {
    page: Option<i64>,
    limit: Option<i64>,
}

impl PageParams {
    fn resolve(&self, config: &PaginationConfig) -> Result<PageRequest, AppError> {
        let request = PageRequest::new(self.page.unwrap_or(1), self.limit.unwrap_or(config.default_limit))?;
        Ok(request.capped(config.max_limit))
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplyListParams {
    page: Option<i64>,
    limit: Option<i64>,
    parent_id: Option<String>,
}

impl ReplyListParams {
    fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            limit: self.limit,
        }
    }
}

/// Absent or `"null"` selects the top level; anything else must be an id.
fn parse_parent_id(raw: Option<&str>) -> Result<Option<ReplyId>, AppError> {
    match raw.map(str::trim) {
        None | Some("null") => Ok(None),
        Some(value) => value
            .parse::<i64>()
            .map(|id| Some(ReplyId(id)))
            .map_err(|_| AppError::ValidationError(format!("parent_id must be an integer or null, got {value:?}"))),
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::ValidationError(format!("{field} is required")))
}

/// Runs a CPU-heavy auth operation (password hashing) off the async workers.
async fn blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&dyn AuthProvider) -> Result<T, AppError> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(state.auth.as_ref()))
        .await
        .map_err(|err| AppError::Internal(format!("auth task failed: {err}")))?
}

// ── Health ──────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "success",
        "message": "United Minds API is running",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// ── Auth ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    user: User,
    token: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<RegisterBody>,
) -> ApiResult<impl IntoResponse> {
    let name = required("name", body.name)?;
    let email = required("email", body.email)?.trim().to_lowercase();
    let password = required("password", body.password)?;

    let password_hash = blocking(&state, move |auth| auth.hash_password(&password)).await?;
    let user = state
        .users
        .create_user(NewUser {
            name: name.trim().to_string(),
            email,
            password_hash,
        })
        .await?;
    let token = state.auth.issue_token(user.id)?;

    info!(user = %user.id, "account registered");
    Ok((StatusCode::CREATED, Json(SessionResponse { user, token })))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<LoginBody>,
) -> ApiResult<Json<SessionResponse>> {
    let email = required("email", body.email)?.trim().to_lowercase();
    let password = required("password", body.password)?;
    let invalid = || AppError::ValidationError("invalid credentials".into());

    let credentials = state.users.find_credentials(&email).await?.ok_or_else(invalid)?;
    let hash = credentials.password_hash;
    let matches = blocking(&state, move |auth| Ok(auth.verify_password(&password, &hash))).await?;
    if !matches {
        return Err(invalid().into());
    }

    let token = state.auth.issue_token(credentials.user.id)?;
    Ok(Json(SessionResponse {
        user: credentials.user,
        token,
    }))
}

pub async fn me(State(state): State<Arc<AppState>>, AuthUser(user_id): AuthUser) -> ApiResult<Json<User>> {
    Ok(Json(state.users.get_user(user_id).await?))
}

// ── Threads ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateThreadBody {
    title: Option<String>,
    content: Option<String>,
}

pub async fn create_thread(
    State(state): State<Arc<AppState>>,
    AuthUser(author_id): AuthUser,
    ApiJson(body): ApiJson<CreateThreadBody>,
) -> ApiResult<impl IntoResponse> {
    let thread = state
        .threads
        .create_thread(NewThread {
            author_id,
            title: required("title", body.title)?,
            content: required("content", body.content)?,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(thread)))
}

pub async fn list_threads(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiResult<impl IntoResponse> {
    let page = params.resolve(&state.pagination)?;
    Ok(Json(state.threads.list_threads(page).await?))
}

pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.threads.get_thread(ThreadId(id)).await?))
}

// ── Votes ───────────────────────────────────────────────────────────────────

async fn cast_vote(
    state: &AppState,
    AuthUser(user_id): AuthUser,
    target: VoteTarget,
    value: VoteValue,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.votes.set_vote(user_id, target, value).await?;
    Ok(Json(outcome))
}

pub async fn upvote_thread(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<impl IntoResponse> {
    cast_vote(&state, user, VoteTarget::Thread(ThreadId(id)), VoteValue::Up).await
}

pub async fn downvote_thread(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<impl IntoResponse> {
    cast_vote(&state, user, VoteTarget::Thread(ThreadId(id)), VoteValue::Down).await
}

pub async fn thread_votes(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.votes.aggregate(VoteTarget::Thread(ThreadId(id))).await?))
}

pub async fn upvote_reply(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<impl IntoResponse> {
    cast_vote(&state, user, VoteTarget::Reply(ReplyId(id)), VoteValue::Up).await
}

pub async fn downvote_reply(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<impl IntoResponse> {
    cast_vote(&state, user, VoteTarget::Reply(ReplyId(id)), VoteValue::Down).await
}

pub async fn reply_votes(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.votes.aggregate(VoteTarget::Reply(ReplyId(id))).await?))
}

// ── Replies ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReplyBody {
    #[serde(alias = "thread_id")]
    thread_id: Option<i64>,
    content: Option<String>,
    #[serde(alias = "parent_id")]
    parent_id: Option<i64>,
}

pub async fn create_reply(
    State(state): State<Arc<AppState>>,
    AuthUser(author_id): AuthUser,
    ApiJson(body): ApiJson<CreateReplyBody>,
) -> ApiResult<impl IntoResponse> {
    let thread_id = body
        .thread_id
        .map(ThreadId)
        .ok_or_else(|| AppError::ValidationError("threadId is required".into()))?;

    let reply = state
        .replies
        .create_reply(NewReply {
            thread_id,
            author_id,
            content: required("content", body.content)?,
            parent_id: body.parent_id.map(ReplyId),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(reply)))
}

pub async fn list_thread_replies(
    State(state): State<Arc<AppState>>,
    ApiPath(thread_id): ApiPath<i64>,
    ApiQuery(params): ApiQuery<ReplyListParams>,
) -> ApiResult<impl IntoResponse> {
    let page = params.page_params().resolve(&state.pagination)?;
    let parent_id = parse_parent_id(params.parent_id.as_deref())?;

    let listing = state.replies.list_replies(ThreadId(thread_id), parent_id, page).await?;
    Ok(Json(listing))
}

pub async fn get_reply(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.replies.get_reply(ReplyId(id)).await?))
}

// ── Reposts ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRepostBody {
    #[serde(alias = "thread_id")]
    thread_id: Option<i64>,
    comment: Option<String>,
}

pub async fn create_repost(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ApiJson(body): ApiJson<CreateRepostBody>,
) -> ApiResult<impl IntoResponse> {
    let thread_id = body
        .thread_id
        .map(ThreadId)
        .ok_or_else(|| AppError::ValidationError("threadId is required".into()))?;

    let repost = state
        .reposts
        .create_repost(NewRepost {
            user_id,
            thread_id,
            comment: body.comment,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(repost)))
}

pub async fn user_reposts(
    State(state): State<Arc<AppState>>,
    ApiPath(user_id): ApiPath<i64>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiResult<impl IntoResponse> {
    let page = params.resolve(&state.pagination)?;
    Ok(Json(state.reposts.reposts_by_user(UserId(user_id), page).await?))
}

pub async fn thread_reposts(
    State(state): State<Arc<AppState>>,
    ApiPath(thread_id): ApiPath<i64>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiResult<impl IntoResponse> {
    let page = params.resolve(&state.pagination)?;
    Ok(Json(state.reposts.reposts_by_thread(ThreadId(thread_id), page).await?))
}

pub async fn delete_repost(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<impl IntoResponse> {
    state.reposts.delete_repost(RepostId(id), user_id).await?;
    Ok(Json(json!({ "message": "repost deleted" })))
}

// ── Follows ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowBody {
    #[serde(alias = "following_id")]
    following_id: Option<i64>,
}

pub async fn follow_user(
    State(state): State<Arc<AppState>>,
    AuthUser(follower): AuthUser,
    ApiJson(body): ApiJson<FollowBody>,
) -> ApiResult<impl IntoResponse> {
    let following = body
        .following_id
        .map(UserId)
        .ok_or_else(|| AppError::ValidationError("followingId is required".into()))?;

    let outcome = state.follows.follow(follower, following).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn unfollow_user(
    State(state): State<Arc<AppState>>,
    AuthUser(follower): AuthUser,
    ApiPath(following): ApiPath<i64>,
) -> ApiResult<impl IntoResponse> {
    let follower_count = state.follows.unfollow(follower, UserId(following)).await?;
    Ok(Json(json!({ "followerCount": follower_count, "message": "user unfollowed" })))
}

pub async fn user_followers(
    State(state): State<Arc<AppState>>,
    ApiPath(user_id): ApiPath<i64>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiResult<impl IntoResponse> {
    let page = params.resolve(&state.pagination)?;
    Ok(Json(state.follows.followers(UserId(user_id), page).await?))
}

pub async fn user_following(
    State(state): State<Arc<AppState>>,
    ApiPath(user_id): ApiPath<i64>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiResult<impl IntoResponse> {
    let page = params.resolve(&state.pagination)?;
    Ok(Json(state.follows.following(UserId(user_id), page).await?))
}

pub async fn follow_status(
    State(state): State<Arc<AppState>>,
    AuthUser(viewer): AuthUser,
    ApiPath(target): ApiPath<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.follows.follow_status(viewer, UserId(target)).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_id_parsing() {
        assert_eq!(parse_parent_id(None).unwrap(), None);
        assert_eq!(parse_parent_id(Some("null")).unwrap(), None);
        assert_eq!(parse_parent_id(Some("12")).unwrap(), Some(ReplyId(12)));
        assert!(matches!(parse_parent_id(Some("twelve")), Err(AppError::ValidationError(_))));
    }

    #[test]
    fn page_params_default_and_cap() {
        let config = PaginationConfig { default_limit: 10, max_limit: 50 };

        let page = PageParams { page: None, limit: None }.resolve(&config).unwrap();
        assert_eq!((page.page(), page.limit()), (1, 10));

        let page = PageParams { page: Some(2), limit: Some(500) }.resolve(&config).unwrap();
        assert_eq!(page.limit(), 50);

        assert!(PageParams { page: Some(0), limit: None }.resolve(&config).is_err());
        assert!(PageParams { page: None, limit: Some(-3) }.resolve(&config).is_err());
    }

    #[test]
    fn required_rejects_blank() {
        assert!(required("content", None).is_err());
        assert!(required("content", Some("   ".into())).is_err());
        assert_eq!(required("content", Some("hi".into())).unwrap(), "hi");
    }
}

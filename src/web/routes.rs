use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use super::extract::{ApiPath, ApiQuery};
use super::AppState;
use crate::auth::normalize_username;
use crate::constants::{
    ANONYMOUS_USERNAME, DEFAULT_PER_PAGE, LEADERBOARD_LIMIT, LEADERBOARD_WINDOW_HOURS,
    MAX_CONTENT_CHARS, MAX_PER_PAGE,
};
use crate::db::{
    create_like, get_comment, get_comment_with_author, get_or_create_user, get_post,
    get_post_with_author, get_user_by_username, insert_comment, insert_post, list_comments,
    list_posts, trailing_leaderboard, user_karma, user_karma_between, CommentNode,
    CommentWithAuthor, LikeReceipt, LikeTarget, NewComment, NewPost, PostTreeQuery,
    PostWithAuthor,
};

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts/", get(list_posts_handler).post(create_post))
        .route("/api/posts/:id/", get(post_detail))
        .route("/api/posts/:id/like/", post(like_post))
        .route("/api/comments/", get(list_comments_handler).post(create_comment))
        .route("/api/comments/:id/", get(comment_detail))
        .route("/api/comments/:id/like/", post(like_comment))
        .route("/api/leaderboard/", get(leaderboard))
        .route("/api/users/:username/karma/", get(user_karma_handler))
        .route("/healthz", get(health))
}

// ========== Response Shapes ==========

#[derive(Debug, Serialize)]
struct AuthorJson<'a> {
    id: i64,
    username: &'a str,
}

#[derive(Debug, Serialize)]
struct PostJson<'a> {
    id: i64,
    author: AuthorJson<'a>,
    content: &'a str,
    created_at: &'a str,
    like_count: i64,
}

impl<'a> From<&'a PostWithAuthor> for PostJson<'a> {
    fn from(post: &'a PostWithAuthor) -> Self {
        Self {
            id: post.id,
            author: AuthorJson {
                id: post.author_id,
                username: &post.author_username,
            },
            content: &post.content,
            created_at: &post.created_at,
            like_count: post.like_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct PostDetailJson<'a> {
    #[serde(flatten)]
    post: PostJson<'a>,
    comments: Vec<CommentJson<'a>>,
}

#[derive(Debug, Serialize)]
struct CommentJson<'a> {
    id: i64,
    post: i64,
    parent: Option<i64>,
    author: AuthorJson<'a>,
    content: &'a str,
    created_at: &'a str,
    like_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    replies: Option<Vec<CommentJson<'a>>>,
}

impl<'a> CommentJson<'a> {
    fn flat(comment: &'a CommentWithAuthor) -> Self {
        Self {
            id: comment.id,
            post: comment.post_id,
            parent: comment.parent_id,
            author: AuthorJson {
                id: comment.author_id,
                username: &comment.author_username,
            },
            content: &comment.content,
            created_at: &comment.created_at,
            like_count: comment.like_count,
            replies: None,
        }
    }

    fn tree(node: &'a CommentNode) -> Self {
        Self {
            replies: Some(node.replies.iter().map(Self::tree).collect()),
            ..Self::flat(&node.comment)
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    data: Vec<T>,
    page: u32,
    per_page: u32,
}

#[derive(Debug, Serialize)]
struct LikeJson {
    status: String,
    like_id: i64,
    recipient_id: i64,
    karma_awarded: i64,
}

impl From<LikeReceipt> for LikeJson {
    fn from(receipt: LikeReceipt) -> Self {
        Self {
            status: format!("{} liked", receipt.target.as_str()),
            like_id: receipt.like_id,
            recipient_id: receipt.recipient_id,
            karma_awarded: receipt.amount,
        }
    }
}

#[derive(Debug, Serialize)]
struct LeaderboardJson {
    id: i64,
    username: String,
    karma_24h: i64,
}

#[derive(Debug, Serialize)]
struct UserKarmaJson {
    id: i64,
    username: String,
    karma: i64,
    karma_24h: i64,
}

// ========== Request Shapes ==========

#[derive(Debug, Deserialize)]
struct PageParams {
    page: Option<u32>,
    per_page: Option<u32>,
}

impl PageParams {
    fn resolve(&self) -> (u32, u32, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let offset = i64::from(page - 1) * i64::from(per_page);
        (page, per_page, offset)
    }
}

#[derive(Debug, Deserialize)]
struct CommentListParams {
    post_id: Option<i64>,
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct CreatePostRequest {
    author_name: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CreateCommentRequest {
    post: Option<i64>,
    parent: Option<i64>,
    author_name: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LikeRequest {
    user_name: Option<String>,
}

/// Parse a JSON body, treating an empty body as the default value.
///
/// Keeps malformed input on the same 400 error shape as every other
/// validation failure.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::Validation(format!("invalid JSON body: {e}")))
}

fn required(field: &str, value: Option<String>) -> ApiResult<String> {
    value.ok_or_else(|| ApiError::Validation(format!("{field} is required")))
}

fn validate_content(value: Option<String>) -> ApiResult<String> {
    let content = required("content", value)?;
    if content.trim().is_empty() {
        return Err(ApiError::Validation("content cannot be empty".to_string()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::Validation(format!(
            "content must be at most {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(content)
}

// ========== Posts ==========

async fn list_posts_handler(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ApiResult<Response> {
    let (page, per_page, offset) = params.resolve();
    let posts = list_posts(state.db.pool(), i64::from(per_page), offset).await?;

    Ok(Json(ApiResponse {
        data: posts.iter().map(PostJson::from).collect(),
        page,
        per_page,
    })
    .into_response())
}

async fn create_post(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let req: CreatePostRequest = parse_body(&body)?;
    let username = normalize_username(&required("author_name", req.author_name)?)?;
    let content = validate_content(req.content)?;

    let author = get_or_create_user(state.db.pool(), &username).await?;
    let post_id = insert_post(
        state.db.pool(),
        &NewPost {
            author_id: author.id,
            content,
        },
    )
    .await?;

    let post = get_post_with_author(state.db.pool(), post_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("post {post_id} not found")))?;

    tracing::info!(post_id, author = %author.username, "Post created");
    Ok((StatusCode::CREATED, Json(PostJson::from(&post))).into_response())
}

async fn post_detail(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Response> {
    let mut query = PostTreeQuery::new(state.db.pool());
    let detail = query
        .fetch(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("post {id} not found")))?;

    Ok(Json(PostDetailJson {
        post: PostJson::from(&detail.post),
        comments: detail.comments.iter().map(CommentJson::tree).collect(),
    })
    .into_response())
}

async fn like_post(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    body: Bytes,
) -> ApiResult<Response> {
    like_target(&state, LikeTarget::Post(id), &body).await
}

// ========== Comments ==========

async fn list_comments_handler(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<CommentListParams>,
) -> ApiResult<Response> {
    let (page, per_page, offset) = PageParams {
        page: params.page,
        per_page: params.per_page,
    }
    .resolve();
    let comments = list_comments(
        state.db.pool(),
        params.post_id,
        i64::from(per_page),
        offset,
    )
    .await?;

    Ok(Json(ApiResponse {
        data: comments.iter().map(CommentJson::flat).collect(),
        page,
        per_page,
    })
    .into_response())
}

async fn create_comment(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let req: CreateCommentRequest = parse_body(&body)?;
    let username = normalize_username(&required("author_name", req.author_name)?)?;
    let content = validate_content(req.content)?;

    let post_id = match (req.post, req.parent) {
        (post_id, Some(parent_id)) => {
            let parent = get_comment(state.db.pool(), parent_id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("comment {parent_id} not found")))?;
            if post_id.is_some_and(|p| p != parent.post_id) {
                return Err(ApiError::Validation(
                    "parent comment belongs to a different post".to_string(),
                ));
            }
            parent.post_id
        }
        (Some(post_id), None) => {
            get_post(state.db.pool(), post_id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("post {post_id} not found")))?;
            post_id
        }
        (None, None) => {
            return Err(ApiError::Validation(
                "post or parent is required".to_string(),
            ))
        }
    };

    let author = get_or_create_user(state.db.pool(), &username).await?;
    let comment_id = insert_comment(
        state.db.pool(),
        &NewComment {
            post_id,
            parent_id: req.parent,
            author_id: author.id,
            content,
        },
    )
    .await?;

    let comment = get_comment_with_author(state.db.pool(), comment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("comment {comment_id} not found")))?;

    tracing::info!(comment_id, post_id, author = %author.username, "Comment created");
    Ok((StatusCode::CREATED, Json(CommentJson::flat(&comment))).into_response())
}

async fn comment_detail(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Response> {
    let comment = get_comment_with_author(state.db.pool(), id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("comment {id} not found")))?;

    Ok(Json(CommentJson::flat(&comment)).into_response())
}

async fn like_comment(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    body: Bytes,
) -> ApiResult<Response> {
    like_target(&state, LikeTarget::Comment(id), &body).await
}

/// Shared body of the two like endpoints.
///
/// The target is checked before the user is resolved so a like on a missing
/// target does not create an account.
async fn like_target(state: &AppState, target: LikeTarget, body: &Bytes) -> ApiResult<Response> {
    let req: LikeRequest = parse_body(body)?;
    let username = normalize_username(req.user_name.as_deref().unwrap_or(ANONYMOUS_USERNAME))?;

    let exists = match target {
        LikeTarget::Post(id) => get_post(state.db.pool(), id).await?.is_some(),
        LikeTarget::Comment(id) => get_comment(state.db.pool(), id).await?.is_some(),
    };
    if !exists {
        return Err(ApiError::NotFound(format!("{target} not found")));
    }

    let user = get_or_create_user(state.db.pool(), &username).await?;
    let receipt = create_like(state.db.pool(), user.id, target).await?;

    Ok((StatusCode::CREATED, Json(LikeJson::from(receipt))).into_response())
}

// ========== Karma ==========

async fn leaderboard(State(state): State<AppState>) -> ApiResult<Response> {
    let entries = trailing_leaderboard(
        state.db.pool(),
        Utc::now(),
        Duration::hours(LEADERBOARD_WINDOW_HOURS),
        LEADERBOARD_LIMIT,
    )
    .await?;

    let body: Vec<LeaderboardJson> = entries
        .into_iter()
        .map(|e| LeaderboardJson {
            id: e.user_id,
            username: e.username,
            karma_24h: e.karma,
        })
        .collect();

    Ok(Json(body).into_response())
}

async fn user_karma_handler(
    State(state): State<AppState>,
    ApiPath(username): ApiPath<String>,
) -> ApiResult<Response> {
    let username = normalize_username(&username)?;
    let user = get_user_by_username(state.db.pool(), &username)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {username} not found")))?;

    let now = Utc::now();
    let karma = user_karma(state.db.pool(), user.id).await?;
    let karma_24h = user_karma_between(
        state.db.pool(),
        user.id,
        now - Duration::hours(LEADERBOARD_WINDOW_HOURS),
        now,
    )
    .await?;

    Ok(Json(UserKarmaJson {
        id: user.id,
        username: user.username,
        karma,
        karma_24h,
    })
    .into_response())
}

async fn health() -> &'static str {
    "OK"
}

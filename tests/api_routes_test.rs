//! Integration tests for the JSON API routes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use karma_feed::config::Config;
use karma_feed::db::Database;
use karma_feed::web::{create_app, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

async fn setup_app() -> (Router, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");

    let config = Config {
        database_path: db_path,
        database_max_connections: 5,
        web_host: "127.0.0.1".to_string(),
        web_port: 0,
        cors_allow_any_origin: true,
    };

    let app = create_app(AppState {
        db,
        config: Arc::new(config),
    });
    (app, temp_dir)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, json)
}

async fn create_post(app: &Router, author: &str, content: &str) -> i64 {
    let (status, body) = send(
        app,
        "POST",
        "/api/posts/",
        Some(json!({"author_name": author, "content": content})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_i64().unwrap()
}

async fn create_comment(app: &Router, payload: Value) -> (StatusCode, Value) {
    send(app, "POST", "/api/comments/", Some(payload)).await
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _temp_dir) = setup_app().await;

    let (status, body) = send(&app, "GET", "/healthz", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

#[tokio::test]
async fn test_create_and_list_posts() {
    let (app, _temp_dir) = setup_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/posts/",
        Some(json!({"author_name": "  Alice ", "content": "First!"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["author"]["username"], "alice");
    assert_eq!(body["content"], "First!");
    assert_eq!(body["like_count"], 0);

    create_post(&app, "bob", "Second").await;

    let (status, body) = send(&app, "GET", "/api/posts/", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    // Newest first
    assert_eq!(data[0]["content"], "Second");
    assert_eq!(body["page"], 1);

    let (_, body) = send(&app, "GET", "/api/posts/?page=2&per_page=1", None).await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["content"], "First!");
}

#[tokio::test]
async fn test_create_post_validation() {
    let (app, _temp_dir) = setup_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/posts/",
        Some(json!({"author_name": "alice", "content": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let (status, _) = send(&app, "POST", "/api/posts/", Some(json!({"content": "hi"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/posts/",
        Some(json!({"author_name": "bad name!", "content": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/posts/")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_like_post_then_duplicate_conflicts() {
    let (app, _temp_dir) = setup_app().await;
    let post_id = create_post(&app, "alice", "Like me").await;
    let uri = format!("/api/posts/{post_id}/like/");

    let (status, body) = send(&app, "POST", &uri, Some(json!({"user_name": "bob"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "post liked");
    assert_eq!(body["karma_awarded"], 5);

    let (status, body) = send(&app, "POST", &uri, Some(json!({"user_name": "Bob"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "DUPLICATE_LIKE");

    let (_, body) = send(&app, "GET", &format!("/api/posts/{post_id}/"), None).await;
    assert_eq!(body["like_count"], 1);

    let (_, body) = send(&app, "GET", "/api/users/alice/karma/", None).await;
    assert_eq!(body["karma"], 5);
    assert_eq!(body["karma_24h"], 5);
}

#[tokio::test]
async fn test_like_without_user_is_anonymous() {
    let (app, _temp_dir) = setup_app().await;
    let post_id = create_post(&app, "alice", "Like me").await;

    let (status, _) = send(&app, "POST", &format!("/api/posts/{post_id}/like/"), None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "GET", "/api/users/anonymous/karma/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["karma"], 0);
}

#[tokio::test]
async fn test_like_comment_credits_one() {
    let (app, _temp_dir) = setup_app().await;
    let post_id = create_post(&app, "alice", "Post").await;
    let (status, comment) = create_comment(
        &app,
        json!({"post": post_id, "author_name": "carol", "content": "Comment"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let comment_id = comment["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/comments/{comment_id}/like/"),
        Some(json!({"user_name": "dave"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "comment liked");
    assert_eq!(body["karma_awarded"], 1);

    let (_, body) = send(&app, "GET", "/api/users/carol/karma/", None).await;
    assert_eq!(body["karma"], 1);

    let (_, body) = send(&app, "GET", &format!("/api/comments/{comment_id}/"), None).await;
    assert_eq!(body["like_count"], 1);
    assert!(body.get("replies").is_none());
}

#[tokio::test]
async fn test_like_missing_target_is_not_found() {
    let (app, _temp_dir) = setup_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/posts/999/like/",
        Some(json!({"user_name": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");

    let (status, _) = send(&app, "POST", "/api/comments/999/like/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The liker was never created.
    let (status, _) = send(&app, "GET", "/api/users/bob/karma/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_detail_nests_replies() {
    let (app, _temp_dir) = setup_app().await;
    let post_id = create_post(&app, "alice", "Thread").await;

    let (_, top) = create_comment(
        &app,
        json!({"post": post_id, "author_name": "bob", "content": "top"}),
    )
    .await;
    let top_id = top["id"].as_i64().unwrap();

    // Post is derived from the parent.
    let (status, reply) = create_comment(
        &app,
        json!({"parent": top_id, "author_name": "carol", "content": "reply"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["post"], post_id);
    assert_eq!(reply["parent"], top_id);
    let reply_id = reply["id"].as_i64().unwrap();

    create_comment(
        &app,
        json!({"post": post_id, "parent": reply_id, "author_name": "alice", "content": "deeper"}),
    )
    .await;

    let (status, body) = send(&app, "GET", &format!("/api/posts/{post_id}/"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["author"]["username"], "alice");

    let comments = body["comments"].as_array().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0]["id"], top_id);
    let replies = comments[0]["replies"].as_array().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["author"]["username"], "carol");
    assert_eq!(replies[0]["replies"][0]["content"], "deeper");
    assert_eq!(replies[0]["replies"][0]["replies"], json!([]));
}

#[tokio::test]
async fn test_comment_parent_on_other_post_rejected() {
    let (app, _temp_dir) = setup_app().await;
    let post_a = create_post(&app, "alice", "A").await;
    let post_b = create_post(&app, "alice", "B").await;

    let (_, top) = create_comment(
        &app,
        json!({"post": post_a, "author_name": "bob", "content": "on A"}),
    )
    .await;

    let (status, body) = create_comment(
        &app,
        json!({"post": post_b, "parent": top["id"], "author_name": "bob", "content": "x"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let (status, _) = create_comment(&app, json!({"author_name": "bob", "content": "x"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = create_comment(
        &app,
        json!({"post": 999, "author_name": "bob", "content": "x"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_comments_by_post() {
    let (app, _temp_dir) = setup_app().await;
    let post_a = create_post(&app, "alice", "A").await;
    let post_b = create_post(&app, "alice", "B").await;

    for post in [post_a, post_a, post_b] {
        create_comment(
            &app,
            json!({"post": post, "author_name": "bob", "content": "hi"}),
        )
        .await;
    }

    let (_, body) = send(&app, "GET", &format!("/api/comments/?post_id={post_a}"), None).await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert!(data.iter().all(|c| c["post"] == post_a));

    let (_, body) = send(&app, "GET", "/api/comments/", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_missing_resources_are_not_found() {
    let (app, _temp_dir) = setup_app().await;

    let (status, body) = send(&app, "GET", "/api/posts/42/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");

    let (status, _) = send(&app, "GET", "/api/comments/42/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_path_and_query_use_error_shape() {
    let (app, _temp_dir) = setup_app().await;

    for uri in [
        "/api/posts/abc/",
        "/api/comments/abc/",
        "/api/comments/?post_id=abc",
        "/api/posts/?page=-1",
    ] {
        let (status, body) = send(&app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(error_code(&body), "VALIDATION_ERROR", "{uri}: {body}");
        assert!(body["error"]["message"].is_string(), "{uri}: {body}");
    }

    let (status, body) = send(&app, "POST", "/api/posts/abc/like/", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_non_ascii_username_rejected() {
    let (app, _temp_dir) = setup_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/posts/",
        Some(json!({"author_name": "josé", "content": "hola"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_leaderboard_endpoint() {
    let (app, _temp_dir) = setup_app().await;

    let (status, body) = send(&app, "GET", "/api/leaderboard/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    // author{i} receives i + 1 post likes
    for i in 0..7 {
        let post_id = create_post(&app, &format!("author{i}"), "post").await;
        for j in 0..=i {
            let (status, _) = send(
                &app,
                "POST",
                &format!("/api/posts/{post_id}/like/"),
                Some(json!({"user_name": format!("fan{j}")})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }
    }

    let (status, body) = send(&app, "GET", "/api/leaderboard/", None).await;
    assert_eq!(status, StatusCode::OK);

    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries[0]["username"], "author6");
    assert_eq!(entries[0]["karma_24h"], 35);
    assert_eq!(entries[4]["username"], "author2");

    let karma: Vec<i64> = entries
        .iter()
        .map(|e| e["karma_24h"].as_i64().unwrap())
        .collect();
    assert!(karma.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_unknown_user_karma_is_not_found() {
    let (app, _temp_dir) = setup_app().await;

    let (status, _) = send(&app, "GET", "/api/users/nobody/karma/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::models::{
    format_timestamp, Comment, CommentWithAuthor, NewComment, NewPost, Post, PostWithAuthor, User,
};

// ========== Users ==========

/// Get a user by ID.
pub async fn get_user_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch user by id")
}

/// Get a user by (normalized) username.
pub async fn get_user_by_username(pool: &SqlitePool, username: &str) -> Result<Option<User>> {
    sqlx::query_as("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch user by username")
}

/// Fetch the user with this (normalized) username, creating it if needed.
///
/// Safe to race: the insert is a no-op when another request created the
/// row first.
pub async fn get_or_create_user(pool: &SqlitePool, username: &str) -> Result<User> {
    sqlx::query(
        r"
        INSERT INTO users (username, created_at)
        VALUES (?, ?)
        ON CONFLICT(username) DO NOTHING
        ",
    )
    .bind(username)
    .bind(format_timestamp(Utc::now()))
    .execute(pool)
    .await
    .context("Failed to create user")?;

    sqlx::query_as("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_one(pool)
        .await
        .context("Failed to fetch user after upsert")
}

/// Count total users.
pub async fn count_users(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;
    Ok(row.0)
}

// ========== Posts ==========

/// Insert a new post, returning its ID.
pub async fn insert_post(pool: &SqlitePool, post: &NewPost) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO posts (author_id, content, created_at)
        VALUES (?, ?, ?)
        ",
    )
    .bind(post.author_id)
    .bind(&post.content)
    .bind(format_timestamp(Utc::now()))
    .execute(pool)
    .await
    .context("Failed to insert post")?;

    Ok(result.last_insert_rowid())
}

/// Get a post by ID.
pub async fn get_post(pool: &SqlitePool, id: i64) -> Result<Option<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post")
}

/// Get a post with its author's username.
pub async fn get_post_with_author(pool: &SqlitePool, id: i64) -> Result<Option<PostWithAuthor>> {
    sqlx::query_as(
        r"
        SELECT
            p.id, p.author_id, u.username AS author_username,
            p.content, p.like_count, p.created_at
        FROM posts p
        JOIN users u ON u.id = p.author_id
        WHERE p.id = ?
        ",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch post with author")
}

/// List posts newest first, authors joined in the same query.
pub async fn list_posts(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<PostWithAuthor>> {
    sqlx::query_as(
        r"
        SELECT
            p.id, p.author_id, u.username AS author_username,
            p.content, p.like_count, p.created_at
        FROM posts p
        JOIN users u ON u.id = p.author_id
        ORDER BY p.created_at DESC, p.id DESC
        LIMIT ? OFFSET ?
        ",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to list posts")
}

/// Count total posts.
pub async fn count_posts(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
        .fetch_one(pool)
        .await
        .context("Failed to count posts")?;
    Ok(row.0)
}

// ========== Comments ==========

/// Insert a new comment, returning its ID.
///
/// The caller is responsible for checking that `parent_id`, when present,
/// belongs to the same post.
pub async fn insert_comment(pool: &SqlitePool, comment: &NewComment) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO comments (post_id, parent_id, author_id, content, created_at)
        VALUES (?, ?, ?, ?, ?)
        ",
    )
    .bind(comment.post_id)
    .bind(comment.parent_id)
    .bind(comment.author_id)
    .bind(&comment.content)
    .bind(format_timestamp(Utc::now()))
    .execute(pool)
    .await
    .context("Failed to insert comment")?;

    Ok(result.last_insert_rowid())
}

/// Get a comment by ID.
pub async fn get_comment(pool: &SqlitePool, id: i64) -> Result<Option<Comment>> {
    sqlx::query_as("SELECT * FROM comments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch comment")
}

/// Get a specific comment with author info.
pub async fn get_comment_with_author(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<CommentWithAuthor>> {
    sqlx::query_as(
        r"
        SELECT
            c.id, c.post_id, c.parent_id, c.author_id,
            u.username AS author_username,
            c.content, c.like_count, c.created_at
        FROM comments c
        JOIN users u ON u.id = c.author_id
        WHERE c.id = ?
        ",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch comment with author")
}

/// Get every comment on a post, oldest first, in a single query.
pub async fn get_comments_for_post(
    pool: &SqlitePool,
    post_id: i64,
) -> Result<Vec<CommentWithAuthor>> {
    sqlx::query_as(
        r"
        SELECT
            c.id, c.post_id, c.parent_id, c.author_id,
            u.username AS author_username,
            c.content, c.like_count, c.created_at
        FROM comments c
        JOIN users u ON u.id = c.author_id
        WHERE c.post_id = ?
        ORDER BY c.created_at ASC, c.id ASC
        ",
    )
    .bind(post_id)
    .fetch_all(pool)
    .await
    .context("Failed to get comments for post")
}

/// List comments oldest first, optionally restricted to one post.
pub async fn list_comments(
    pool: &SqlitePool,
    post_id: Option<i64>,
    limit: i64,
    offset: i64,
) -> Result<Vec<CommentWithAuthor>> {
    sqlx::query_as(
        r"
        SELECT
            c.id, c.post_id, c.parent_id, c.author_id,
            u.username AS author_username,
            c.content, c.like_count, c.created_at
        FROM comments c
        JOIN users u ON u.id = c.author_id
        WHERE (?1 IS NULL OR c.post_id = ?1)
        ORDER BY c.created_at ASC, c.id ASC
        LIMIT ?2 OFFSET ?3
        ",
    )
    .bind(post_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to list comments")
}

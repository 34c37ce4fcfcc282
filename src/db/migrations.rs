use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// v1: users, posts and threaded comments.
async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating content schema");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create users table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            like_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at DESC)")
        .execute(pool)
        .await
        .context("Failed to create posts created_at index")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            parent_id INTEGER REFERENCES comments(id) ON DELETE CASCADE,
            author_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            like_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create comments table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_post_parent ON comments(post_id, parent_id)")
        .execute(pool)
        .await
        .context("Failed to create comments post/parent index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_created_at ON comments(created_at)")
        .execute(pool)
        .await
        .context("Failed to create comments created_at index")?;

    Ok(())
}

/// v2: likes and the karma ledger.
///
/// Duplicate likes are rejected by the partial unique indexes, so two
/// racing requests cannot both insert.
async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: creating likes and karma ledger");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS likes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            post_id INTEGER REFERENCES posts(id) ON DELETE CASCADE,
            comment_id INTEGER REFERENCES comments(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            CHECK ((post_id IS NULL) != (comment_id IS NULL))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create likes table")?;

    sqlx::query(
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_likes_unique_post
        ON likes(user_id, post_id) WHERE post_id IS NOT NULL
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create unique post like index")?;

    sqlx::query(
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_likes_unique_comment
        ON likes(user_id, comment_id) WHERE comment_id IS NOT NULL
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create unique comment like index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_likes_post ON likes(post_id, created_at)")
        .execute(pool)
        .await
        .context("Failed to create likes post index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_likes_comment ON likes(comment_id, created_at)")
        .execute(pool)
        .await
        .context("Failed to create likes comment index")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS karma_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            amount INTEGER NOT NULL,
            like_id INTEGER NOT NULL UNIQUE REFERENCES likes(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create karma_transactions table")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_karma_recipient_created
        ON karma_transactions(recipient_id, created_at DESC)
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create karma recipient index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_karma_created ON karma_transactions(created_at)")
        .execute(pool)
        .await
        .context("Failed to create karma created_at index")?;

    Ok(())
}

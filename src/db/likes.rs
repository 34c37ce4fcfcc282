//! The like guard: at most one like per (user, target), and exactly one
//! ledger entry per like.

use anyhow::Context;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};

use super::karma::record_transaction;
use super::models::{Like, LikeTarget, SQL_NOW};

#[derive(Debug, Error)]
pub enum LikeError {
    #[error("you already liked this {}", .0.as_str())]
    Duplicate(LikeTarget),
    #[error("{0} not found")]
    TargetNotFound(LikeTarget),
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("database error while liking: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of a successful like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeReceipt {
    pub like_id: i64,
    pub transaction_id: i64,
    pub target: LikeTarget,
    pub recipient_id: i64,
    pub amount: i64,
}

/// Like a post, crediting its author.
pub async fn like_post(
    pool: &SqlitePool,
    user_id: i64,
    post_id: i64,
) -> Result<LikeReceipt, LikeError> {
    create_like(pool, user_id, LikeTarget::Post(post_id)).await
}

/// Like a comment, crediting its author.
pub async fn like_comment(
    pool: &SqlitePool,
    user_id: i64,
    comment_id: i64,
) -> Result<LikeReceipt, LikeError> {
    create_like(pool, user_id, LikeTarget::Comment(comment_id)).await
}

/// Insert a like and its ledger entry in one transaction.
///
/// The insert into `likes` is the first statement, so the transaction holds
/// SQLite's write lock before it reads anything. A second like by the same
/// user on the same target fails on the unique index and rolls back, leaving
/// no ledger entry and no like count change.
pub async fn create_like(
    pool: &SqlitePool,
    user_id: i64,
    target: LikeTarget,
) -> Result<LikeReceipt, LikeError> {
    let mut tx = pool.begin().await?;

    // created_at is evaluated by SQLite once the write lock is held.
    let insert_sql = format!(
        "INSERT INTO likes (user_id, {column}, created_at) \
         SELECT ?, id, {now} FROM {table} WHERE id = ? \
         RETURNING id, created_at",
        column = target.like_column(),
        table = target.table(),
        now = SQL_NOW,
    );
    let inserted: Result<Option<(i64, String)>, sqlx::Error> = sqlx::query_as(&insert_sql)
        .bind(user_id)
        .bind(target.id())
        .fetch_optional(&mut *tx)
        .await;

    let (like_id, created_at) = match inserted {
        Ok(Some(row)) => row,
        Ok(None) => return Err(LikeError::TargetNotFound(target)),
        Err(e) if is_unique_violation(&e) => {
            debug!(user_id, %target, "Rejected duplicate like");
            return Err(LikeError::Duplicate(target));
        }
        Err(e) if is_foreign_key_violation(&e) => return Err(LikeError::UserNotFound(user_id)),
        Err(e) => return Err(e.into()),
    };

    let author_sql = format!("SELECT author_id FROM {} WHERE id = ?", target.table());
    let recipient_id: i64 = sqlx::query_scalar(&author_sql)
        .bind(target.id())
        .fetch_one(&mut *tx)
        .await?;

    let amount = target.karma_amount();
    let transaction_id =
        record_transaction(&mut *tx, recipient_id, amount, like_id, &created_at).await?;

    let bump_sql = format!(
        "UPDATE {} SET like_count = like_count + 1 WHERE id = ?",
        target.table()
    );
    sqlx::query(&bump_sql)
        .bind(target.id())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        user_id,
        %target,
        like_id,
        recipient_id,
        amount,
        "Like recorded and karma credited"
    );

    Ok(LikeReceipt {
        like_id,
        transaction_id,
        target,
        recipient_id,
        amount,
    })
}

/// Get a like by ID.
pub async fn get_like(pool: &SqlitePool, id: i64) -> anyhow::Result<Option<Like>> {
    sqlx::query_as("SELECT * FROM likes WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch like")
}

/// Check if a user has liked a target.
pub async fn has_user_liked(
    pool: &SqlitePool,
    user_id: i64,
    target: LikeTarget,
) -> anyhow::Result<bool> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM likes WHERE user_id = ? AND {} = ?)",
        target.like_column()
    );
    let exists: bool = sqlx::query_scalar(&sql)
        .bind(user_id)
        .bind(target.id())
        .fetch_one(pool)
        .await
        .context("Failed to check user like")?;
    Ok(exists)
}

/// Count likes on a target straight from the `likes` table.
pub async fn count_likes(pool: &SqlitePool, target: LikeTarget) -> anyhow::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM likes WHERE {} = ?", target.like_column());
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(target.id())
        .fetch_one(pool)
        .await
        .context("Failed to count likes")?;
    Ok(count)
}

/// Rebuild every cached `like_count` from the `likes` table.
///
/// Returns the number of posts and comments whose cached count was wrong.
pub async fn recount_like_counts(pool: &SqlitePool) -> anyhow::Result<u64> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin like recount transaction")?;

    let posts = sqlx::query(
        r"
        UPDATE posts
        SET like_count = (SELECT COUNT(*) FROM likes WHERE likes.post_id = posts.id)
        WHERE like_count != (SELECT COUNT(*) FROM likes WHERE likes.post_id = posts.id)
        ",
    )
    .execute(&mut *tx)
    .await
    .context("Failed to recount post likes")?;

    let comments = sqlx::query(
        r"
        UPDATE comments
        SET like_count = (SELECT COUNT(*) FROM likes WHERE likes.comment_id = comments.id)
        WHERE like_count != (SELECT COUNT(*) FROM likes WHERE likes.comment_id = comments.id)
        ",
    )
    .execute(&mut *tx)
    .await
    .context("Failed to recount comment likes")?;

    tx.commit()
        .await
        .context("Failed to commit like recount")?;

    let fixed = posts.rows_affected() + comments.rows_affected();
    if fixed > 0 {
        info!(fixed, "Repaired cached like counts");
    }
    Ok(fixed)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

//! The karma ledger and the leaderboard aggregation over it.
//!
//! Karma is never stored as a running total. Every credit is one row in
//! `karma_transactions`, and every karma figure the service reports is a
//! `SUM` over those rows at read time.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use super::models::{format_timestamp, KarmaTransaction, LeaderboardEntry};

/// Append one entry to the ledger, returning its ID.
///
/// Takes a connection rather than the pool so it joins the caller's
/// transaction; the like guard is the only writer.
pub(crate) async fn record_transaction(
    conn: &mut SqliteConnection,
    recipient_id: i64,
    amount: i64,
    like_id: i64,
    created_at: &str,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r"
        INSERT INTO karma_transactions (recipient_id, amount, like_id, created_at)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(recipient_id)
    .bind(amount)
    .bind(like_id)
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Users ranked by karma earned in `[window_start, window_end)`.
///
/// Users with nothing in the window are absent. Equal totals are ordered by
/// user id so the ranking is stable between requests.
pub async fn top_contributors(
    pool: &SqlitePool,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<LeaderboardEntry>> {
    sqlx::query_as(
        r"
        SELECT
            u.id AS user_id,
            u.username,
            SUM(k.amount) AS karma
        FROM karma_transactions k
        JOIN users u ON u.id = k.recipient_id
        WHERE k.created_at >= ? AND k.created_at < ?
        GROUP BY u.id, u.username
        ORDER BY karma DESC, u.id ASC
        LIMIT ?
        ",
    )
    .bind(format_timestamp(window_start))
    .bind(format_timestamp(window_end))
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to compute leaderboard")
}

/// Leaderboard for the `window` ending at `now`.
pub async fn trailing_leaderboard(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    window: Duration,
    limit: i64,
) -> Result<Vec<LeaderboardEntry>> {
    top_contributors(pool, now - window, now, limit).await
}

/// A user's all-time karma: the sum of every ledger entry crediting them.
pub async fn user_karma(pool: &SqlitePool, user_id: i64) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount), 0) FROM karma_transactions WHERE recipient_id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .context("Failed to sum user karma")?;
    Ok(row.0)
}

/// A user's karma earned in `[start, end)`.
pub async fn user_karma_between(
    pool: &SqlitePool,
    user_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r"
        SELECT COALESCE(SUM(amount), 0)
        FROM karma_transactions
        WHERE recipient_id = ? AND created_at >= ? AND created_at < ?
        ",
    )
    .bind(user_id)
    .bind(format_timestamp(start))
    .bind(format_timestamp(end))
    .fetch_one(pool)
    .await
    .context("Failed to sum user karma in window")?;
    Ok(row.0)
}

/// The ledger entry written for a like, if any.
pub async fn get_karma_transaction_for_like(
    pool: &SqlitePool,
    like_id: i64,
) -> Result<Option<KarmaTransaction>> {
    sqlx::query_as("SELECT * FROM karma_transactions WHERE like_id = ?")
        .bind(like_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch karma transaction for like")
}

/// Most recent ledger entries crediting a user, newest first.
pub async fn get_karma_transactions_for_user(
    pool: &SqlitePool,
    user_id: i64,
    limit: i64,
) -> Result<Vec<KarmaTransaction>> {
    sqlx::query_as(
        r"
        SELECT * FROM karma_transactions
        WHERE recipient_id = ?
        ORDER BY created_at DESC, id DESC
        LIMIT ?
        ",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch karma transactions for user")
}

/// Count every ledger entry.
pub async fn count_karma_transactions(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM karma_transactions")
        .fetch_one(pool)
        .await
        .context("Failed to count karma transactions")?;
    Ok(row.0)
}

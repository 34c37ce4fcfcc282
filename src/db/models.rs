use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{COMMENT_LIKE_KARMA, POST_LIKE_KARMA};

/// Storage format for every timestamp column.
///
/// Fixed width and UTC, so SQLite's lexical `<` / `>=` on the text column
/// agrees with chronological order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// SQL expression for the current time in `TIMESTAMP_FORMAT`.
///
/// SQLite's `%f` stops at milliseconds; the zero padding keeps the column
/// fixed width.
pub(crate) const SQL_NOW: &str = "strftime('%Y-%m-%dT%H:%M:%f', 'now') || '000Z'";

/// Format a timestamp for storage.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
        .ok()
        .map(|naive| naive.and_utc())
}

/// A community member. Karma is not stored here; see the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}

/// A text post in the feed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    pub content: String,
    /// Cached count, maintained by the like transaction.
    pub like_count: i64,
    pub created_at: String,
}

/// A post joined with its author's username.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostWithAuthor {
    pub id: i64,
    pub author_id: i64,
    pub author_username: String,
    pub content: String,
    pub like_count: i64,
    pub created_at: String,
}

/// A threaded comment on a post.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub author_id: i64,
    pub content: String,
    pub like_count: i64,
    pub created_at: String,
}

/// A comment joined with its author's username.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CommentWithAuthor {
    pub id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub author_id: i64,
    pub author_username: String,
    pub content: String,
    pub like_count: i64,
    pub created_at: String,
}

/// A like on either a post or a comment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Like {
    pub id: i64,
    pub user_id: i64,
    pub post_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub created_at: String,
}

/// One ledger entry. Rows are only ever inserted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct KarmaTransaction {
    pub id: i64,
    pub recipient_id: i64,
    pub amount: i64,
    pub like_id: i64,
    pub created_at: String,
}

/// A user's karma summed over a leaderboard window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub username: String,
    pub karma: i64,
}

/// What a like points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeTarget {
    Post(i64),
    Comment(i64),
}

impl LikeTarget {
    #[must_use]
    pub const fn id(&self) -> i64 {
        match self {
            Self::Post(id) | Self::Comment(id) => *id,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Post(_) => "post",
            Self::Comment(_) => "comment",
        }
    }

    /// Karma credited to the target's author for one like.
    #[must_use]
    pub const fn karma_amount(&self) -> i64 {
        match self {
            Self::Post(_) => POST_LIKE_KARMA,
            Self::Comment(_) => COMMENT_LIKE_KARMA,
        }
    }

    pub(crate) const fn table(&self) -> &'static str {
        match self {
            Self::Post(_) => "posts",
            Self::Comment(_) => "comments",
        }
    }

    pub(crate) const fn like_column(&self) -> &'static str {
        match self {
            Self::Post(_) => "post_id",
            Self::Comment(_) => "comment_id",
        }
    }
}

impl std::fmt::Display for LikeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_str(), self.id())
    }
}

/// Data for inserting a new post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: i64,
    pub content: String,
}

/// Data for inserting a new comment.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub author_id: i64,
    pub content: String,
}

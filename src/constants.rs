//! Shared constants used across the application.

/// Karma credited to a post's author for each like on the post.
pub const POST_LIKE_KARMA: i64 = 5;

/// Karma credited to a comment's author for each like on the comment.
pub const COMMENT_LIKE_KARMA: i64 = 1;

/// Trailing window the leaderboard sums karma over, in hours.
pub const LEADERBOARD_WINDOW_HOURS: i64 = 24;

/// Maximum number of entries the leaderboard endpoint returns.
pub const LEADERBOARD_LIMIT: i64 = 5;

/// Username used for likes that do not name a user.
pub const ANONYMOUS_USERNAME: &str = "anonymous";

/// Longest accepted username, in characters.
pub const MAX_USERNAME_CHARS: usize = 150;

/// Longest accepted post or comment body, in characters.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Default and maximum page sizes for list endpoints.
pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

use thiserror::Error;

use crate::constants::MAX_USERNAME_CHARS;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    #[error("username is required")]
    Empty,
    #[error("username must be at most {MAX_USERNAME_CHARS} characters")]
    TooLong,
    #[error("username may only contain a-z, 0-9 and @.+-_ (found {0:?})")]
    InvalidChar(char),
}

/// Normalize a raw username: trim surrounding whitespace and lowercase.
///
/// After lowercasing, only ASCII `a-z`, `0-9` and `@ . + - _` are accepted.
pub fn normalize_username(raw: &str) -> Result<String, UsernameError> {
    let username = raw.trim().to_lowercase();

    if username.is_empty() {
        return Err(UsernameError::Empty);
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(UsernameError::TooLong);
    }
    if let Some(bad) = username
        .chars()
        .find(|c| !is_username_char(*c))
    {
        return Err(UsernameError::InvalidChar(bad));
    }

    Ok(username)
}

fn is_username_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '@' | '.' | '+' | '-' | '_')
}

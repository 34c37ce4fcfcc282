//! Identification of the acting user.
//!
//! Requests name their user in the body; there is no session or password
//! layer. Names are normalized before lookup so that `Alice` and ` alice `
//! resolve to the same account.

pub mod username;

pub use username::{normalize_username, UsernameError};

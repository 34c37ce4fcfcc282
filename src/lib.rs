//! Karma feed library.
//!
//! A community discussion backend: posts, threaded comments, likes, and a
//! karma ledger that feeds a trailing-window leaderboard.

pub mod auth;
pub mod config;
pub mod constants;
pub mod db;
pub mod web;

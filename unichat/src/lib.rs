//! `unichat` — client for the Team Unicorns real-time group chat.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod session;
pub mod transport;

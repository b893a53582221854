//! Shared protocol definitions for the unichat HTTP and WebSocket wire format.

pub mod auth;
pub mod frame;
pub mod message;

//! `FocusFlow` server library.
//!
//! Exposes the HTTP API and the change-feed websocket for use in tests and
//! embedding. The server hosts the sharing core over the in-memory backend.

pub mod api;
pub mod config;
pub mod feed;

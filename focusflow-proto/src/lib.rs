//! Shared data model for `FocusFlow` task sharing.
//!
//! Every layer (core library, server, clients) speaks these types. Nothing
//! here performs I/O; the change-feed frames in [`feed`] are the only
//! serialized form this crate owns.

pub mod activity;
pub mod chat;
pub mod feed;
pub mod ids;
pub mod share;
pub mod task;
pub mod user;

//! `FocusFlow`: task sharing, permissions and realtime sync.
//!
//! The crate is generic over a [`backend::Backend`]; [`backend::memory`]
//! provides the in-process implementation used by the server and the tests.
//! [`app::App`] wires the services together and [`session::Session`] is the
//! signed-in user's context.

pub mod app;
pub mod assistant;
pub mod backend;
pub mod config;
pub mod realtime;
pub mod session;
pub mod sharing;
pub mod tasks;

pub use app::App;
pub use session::{Preferences, Session};
pub use sharing::SharingError;

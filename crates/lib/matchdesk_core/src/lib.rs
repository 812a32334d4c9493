//! # matchdesk_core
//!
//! Session and token lifecycle core for Matchdesk.
//!
//! The console's screens only ever read the session; everything that
//! creates, verifies, refreshes or destroys it lives here.

pub mod config;
pub mod models;
pub mod session;

pub use session::controller::SessionController;
pub use session::{SessionError, SessionResult};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

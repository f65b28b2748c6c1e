//! HTTP surface for speech-coach.
//!
//! Accepts recorded answers, streams pipeline progress back as NDJSON, and
//! serves task lookups, playback URLs and signed blob downloads.

pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use server::{router, serve, start_gateway};
pub use state::AppState;

//! Core types, config, errors, event protocol, and storage collaborators for speech-coach.

pub mod blob;
pub mod config;
pub mod error;
pub mod protocol;
pub mod store;
pub mod types;

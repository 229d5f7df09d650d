//! Shared data model, configuration, seam traits, and service status
//! handles for the streaming window pipeline.

pub mod config;
pub mod status;
pub mod stream;
pub mod types;

//! Shared types for the repolens daemon and client.
//!
//! This crate carries everything both binaries agree on: the error catalog
//! and classifier, per-audience error rendering, the analysis progress
//! contract, the WebSocket wire protocol, and configuration loading.

pub mod config;
pub mod errors;
pub mod progress;
pub mod wire;

pub use config::Config;
pub use errors::{ClassifiedError, ErrorClassifier, ErrorContext, ErrorFormatter};
pub use progress::{AnalysisProgress, AnalysisStatus, ProgressStore, ProgressUpdate};

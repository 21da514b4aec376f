//! Repolens client library: daemon API wrapper and the WebSocket connection
//! manager.

pub mod api;
pub mod connection;

pub use api::ApiClient;
pub use connection::ConnectionManager;

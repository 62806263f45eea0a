/// Shared modules for the signal screener
pub mod alerts;
pub mod api;
pub mod config;
pub mod dashboard;
pub mod encoding;
pub mod error;
pub mod reconciler;
pub mod settings;
pub mod store;
pub mod types;
pub mod watchlist;
pub mod websocket;

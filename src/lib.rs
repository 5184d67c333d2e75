//! Proposal Desk - multi-tenant proposal management
//!
//! Library half of the server: entity services over a table store, the
//! HTTP API, typed client bridges with caching, dashboard aggregation,
//! the proposal wizard and incremental database sync.

pub mod app;
pub mod auth;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod http;
pub mod services;
pub mod store;
pub mod sync;
pub mod util;
pub mod wizard;

pub use error::{ErrorCode, StandardError};

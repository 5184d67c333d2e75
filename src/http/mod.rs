//! HTTP surface: router, auth middleware and handlers

pub mod customers;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod products;
pub mod proposals;
pub mod routes;
pub mod tenant;
pub mod users;

pub use routes::build_router;

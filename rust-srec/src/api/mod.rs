//! REST/SSE API module.
//!
//! Provides HTTP endpoints for probing, downloading, and monitoring media
//! acquisition tasks.

pub mod error;
pub mod routes;
pub mod server;

pub use server::ApiServer;

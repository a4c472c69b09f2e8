//! REST API module for external integrations
//!
//! Provides a read-only HTTP API for querying Stores, plus health and
//! metrics endpoints.

mod dto;
mod handlers;
mod server;

pub use server::{router, run_server};

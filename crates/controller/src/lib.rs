//! Fleet controller daemon internals: configuration and HTTP API

pub mod api;
pub mod config;

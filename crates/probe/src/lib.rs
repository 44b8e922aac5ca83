//! Metrics probe process: settings loading and the HTTP API

pub mod api;
pub mod config;

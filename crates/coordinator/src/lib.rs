//! Coordinator daemon: configuration, in-process agent pool and HTTP API

pub mod api;
pub mod config;
pub mod pool;

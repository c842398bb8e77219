//! HTTP front-end for a supervised prediction daemon

pub mod api;
pub mod config;

//! Tollgate - per-client admission control
//!
//! This crate implements a token bucket rate limiter keyed by client address,
//! with lazy drift-free refill, a bounded per-client store, and a background
//! sweep that evicts idle clients. It is embedded as axum middleware in front
//! of an HTTP handler chain.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;

//! LMS REST Bridge
//!
//! REST front end for the Logitech Media Server command-line interface.
//!
//! This library provides:
//! - A serialized, self-reconnecting LMS CLI session
//! - CLI command escaping and status reply parsing
//! - Player name resolution and action dispatch
//! - The axum router serving the REST API

pub mod adapters;
pub mod api;
pub mod config;

//! Mock servers for adapter integration testing
//!
//! Simulates the LMS CLI so the full connection, registry and dispatch path
//! runs against a real socket without real hardware.

pub mod lms;

pub use lms::MockLmsServer;

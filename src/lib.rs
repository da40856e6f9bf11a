//! pickline: sports-prediction data sync, settlement and notification engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod channels;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod engine;
pub mod error;
pub mod storage;
pub mod types;

//! Meeting bot session engine.
//!
//! Sends a bot into scheduled video meetings through a bot gateway, watches until it is
//! admitted, follows the live transcript and posts the result when the meeting ends.

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod gateway;
pub mod global;
pub mod orchestrator;
pub mod session;
pub mod verifier;

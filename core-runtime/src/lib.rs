//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the daily content cache engine:
//! - Logging and tracing infrastructure
//! - Engine settings with validation
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the engine crates depend on.
//! It establishes the logging conventions, configuration surface, and event
//! broadcasting mechanisms used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};

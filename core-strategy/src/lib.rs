//! # Core Strategy
//!
//! Startup and optimization strategies for the cache engine.
//!
//! Each family follows the same shape: an enum of kinds, a pure selection
//! function over a context struct, and a trait whose `execute` drives a target
//! seam implemented by the coordinator. Selection is deterministic for a given
//! context.

pub mod error;
pub mod initialization;
pub mod optimization;

pub use error::{Result, StrategyError};
pub use initialization::{
    select_initialization, InitStep, InitializationContext, InitializationKind,
    InitializationReport, InitializationStrategy, InitializationTarget,
};
pub use optimization::{
    select_optimization, DeviceCapability, OptimizationContext, OptimizationKind,
    OptimizationOutcome, OptimizationStrategy, OptimizationTarget, UsagePattern,
};

//! Reconcile Module
//!
//! Turns a validated desired tree into backend calls:
//! - Preflight checks and the var/share dataset policy
//! - Plan construction (partition tables, pools, datasets, boot environments)
//! - Sequential execution with progress reporting

pub mod engine;
pub mod plan;
pub mod varshare;

pub use engine::*;
pub use plan::*;
pub use varshare::VarSharePolicy;

//! Topology Module
//!
//! Derives each pool's vdev layout from the devices tagged for it.

pub mod builder;

pub use builder::*;

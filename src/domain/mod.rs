//! Domain Module
//!
//! Core value types and the ports through which the engine talks to the
//! outside world.

pub mod ports;
pub mod size;

pub use ports::*;
pub use size::*;

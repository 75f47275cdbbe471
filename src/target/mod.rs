//! Target Module
//!
//! The storage target data model: entity payloads, the arena-backed tree
//! holding the discovered and desired forests, and their document form.

pub mod document;
pub mod entity;
pub mod reserved;
pub mod tree;

pub use document::*;
pub use entity::*;
pub use reserved::*;
pub use tree::*;

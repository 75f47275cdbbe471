//! Backend Adapters
//!
//! Implementations of the `StorageBackend` port:
//! - `MemoryBackend`: in-process model used for dry runs and tests
//! - `CommandBackend`: drives the native pool, dataset, boot environment
//!   and partitioning tools

pub mod command;
pub mod memory;

pub use command::CommandBackend;
pub use memory::{BackendCall, MemoryBackend};

use crate::domain::ports::StorageBackendRef;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Create a backend by name
pub fn create_backend(name: &str) -> Result<StorageBackendRef> {
    match name {
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        "command" => Ok(Arc::new(CommandBackend::detect()?)),
        other => Err(Error::BackendUnavailable {
            backend: other.to_string(),
            reason: "unknown backend; expected 'memory' or 'command'".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::StorageBackend;

    #[test]
    fn test_create_backend() {
        let backend = create_backend("memory").unwrap();
        assert_eq!(backend.name(), "memory");
        match create_backend("iscsi") {
            Err(Error::BackendUnavailable { backend, .. }) => assert_eq!(backend, "iscsi"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("unknown backend accepted"),
        }
    }
}

//! Graph storage abstraction and the in-memory reference backend.
//!
//! External vector-capable stores plug in by implementing [`GraphStore`];
//! [`MemoryGraphStore`] keeps the crate usable and testable without one.

mod memory;
mod traits;

pub use memory::MemoryGraphStore;
pub use traits::{EntityFilter, GraphStore, Upserted};

use std::sync::Arc;

use crate::config::{StoreConfig, StoreKind};
use crate::error::Result;

/// Create a graph store from configuration.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn GraphStore>> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryGraphStore::new())),
    }
}

//! Knowledge graph data model.
//!
//! Everything the pipeline persists or retrieves is expressed in terms of
//! these types: typed entities, directed relationships, source documents,
//! and the scope boundary that isolates tenants from each other.

mod types;

pub use types::{
    content_hash, Document, Entity, GraphStats, Relationship, Scope, Subgraph,
    INTERNAL_PROPERTIES,
};

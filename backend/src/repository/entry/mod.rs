//! Entry Repository Module
//!
//! - entry_repo: Core CRUD operations and shot listings
//! - entry_positioning: Timeline moves and copies

mod entry_positioning;
mod entry_repo;

pub use entry_repo::EntryRepository;

// Re-export the operation trait so it can be used by importing EntryRepository
pub use entry_positioning::EntryPositioningOperations;

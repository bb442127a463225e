//! Repository Layer
//!
//! Data access abstractions and implementations.

mod db;
mod entry;
mod generation_repo;
mod shot;
mod traits;


pub use db::{init_db, DbState, SharedConnection};
pub use entry::{EntryPositioningOperations, EntryRepository};
pub use generation_repo::GenerationRepository;
pub use shot::ShotRepository;
pub use traits::Repository;

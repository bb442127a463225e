//! Shotline Backend
//!
//! SQLite persistence for shots and their entries, exposed to the engine as
//! a `RemoteStore`.
//!
//! Layered architecture:
//! - domain: entity contract and errors
//! - repository: data access over rusqlite
//! - store: the engine-facing adapter

pub mod domain;
pub mod repository;
pub mod store;

pub use domain::{DomainError, DomainResult, Entity};
pub use repository::{init_db, DbState};
pub use store::SqliteStore;

//! Domain Layer
//!
//! The entity contract, domain errors and id conversions. Records themselves
//! are the engine's `Shot`, `Entry` and `Generation`.

mod entity;

pub use entity::{parse_row_id, row_id, DomainError, DomainResult, Entity};

//! Cache Projection Store
//!
//! This module holds the denormalized read views split into:
//! - key: cache keys and projection values
//! - store: the keyed store, snapshots and refetch suppression
//! - views: builders that derive one view from another

mod key;
mod store;
mod views;

pub use key::{CacheKey, Projection};
pub use store::{CacheSlot, CacheStore, SharedCache, Snapshot};
pub use views::{build_shot_views, capped_entries, generation_usage, project_keys_for_shot, sync_project_views};

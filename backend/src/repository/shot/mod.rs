//! Shot Repository Module

mod shot_repo;

pub use shot_repo::ShotRepository;

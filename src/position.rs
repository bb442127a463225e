//! Position Allocator
//!
//! Pure functions computing timeline keys that never collide with the keys
//! already occupied in a shot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Bound::{Excluded, Unbounded};
use thiserror::Error;

use crate::models::Entry;

/// Spacing rules used by the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionPolicy {
    /// Gap between appended entries
    pub step: i64,
    /// Widest offset probed around a colliding midpoint
    pub max_probe_offset: i64,
}

impl Default for PositionPolicy {
    fn default() -> Self {
        Self {
            step: 60,
            max_probe_offset: 1000,
        }
    }
}

impl PositionPolicy {
    pub fn half_step(&self) -> i64 {
        self.step / 2
    }
}

/// What the caller wants the new key to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// After the current last entry
    Append,
    /// A specific slot; the next free integer above it if taken
    Explicit(i64),
    /// Between a known entry and its successor (if any)
    Between { prev: i64, next: Option<i64> },
    /// Strictly above `prev` and below `next`; never falls back below `prev`
    After { prev: i64, next: Option<i64> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("no free position within {max_offset} of {target}")]
    Exhausted { target: i64, max_offset: i64 },
    #[error("no free position between {prev} and {next}")]
    NoGap { prev: i64, next: i64 },
    #[error("position range exhausted")]
    Overflow,
}

/// Keys currently held by positioned entries
pub fn occupied_positions<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> BTreeSet<i64> {
    entries.into_iter().filter_map(|e| e.position).collect()
}

/// Smallest occupied key strictly greater than `position`
pub fn successor(occupied: &BTreeSet<i64>, position: i64) -> Option<i64> {
    occupied.range((Excluded(position), Unbounded)).next().copied()
}

/// Compute a key for `intent` that is not in `occupied`.
pub fn allocate(
    occupied: &BTreeSet<i64>,
    intent: Intent,
    policy: &PositionPolicy,
) -> Result<i64, AllocationError> {
    match intent {
        Intent::Append => {
            let last = occupied.iter().next_back().copied().unwrap_or(-policy.step);
            last.checked_add(policy.step).ok_or(AllocationError::Overflow)
        }
        Intent::Explicit(requested) => probe_upward(occupied, requested),
        Intent::Between { prev, next } => {
            let target = match next {
                Some(next) => midpoint(prev, next),
                None => prev.checked_add(policy.half_step()).ok_or(AllocationError::Overflow)?,
            };
            probe_outward(occupied, target, policy.max_probe_offset)
        }
        Intent::After { prev, next } => {
            let floor = prev.checked_add(1).ok_or(AllocationError::Overflow)?;
            match next {
                Some(next) => probe_within(occupied, midpoint(prev, next).max(floor), floor, next)
                    .ok_or(AllocationError::NoGap { prev, next }),
                None => {
                    let target = prev
                        .checked_add(policy.half_step().max(1))
                        .ok_or(AllocationError::Overflow)?;
                    probe_upward(occupied, target)
                }
            }
        }
    }
}

fn midpoint(a: i64, b: i64) -> i64 {
    // floor, also for negative sums
    ((a as i128 + b as i128).div_euclid(2)) as i64
}

fn probe_upward(occupied: &BTreeSet<i64>, start: i64) -> Result<i64, AllocationError> {
    let mut candidate = start;
    while occupied.contains(&candidate) {
        candidate = candidate.checked_add(1).ok_or(AllocationError::Overflow)?;
    }
    Ok(candidate)
}

fn probe_outward(occupied: &BTreeSet<i64>, target: i64, max_offset: i64) -> Result<i64, AllocationError> {
    if !occupied.contains(&target) {
        return Ok(target);
    }
    for offset in 1..=max_offset {
        for candidate in [target.checked_add(offset), target.checked_sub(offset)].into_iter().flatten() {
            if !occupied.contains(&candidate) {
                return Ok(candidate);
            }
        }
    }
    Err(AllocationError::Exhausted { target, max_offset })
}

/// First free key in `[target, ceiling)`, else the highest free key in `[floor, target)`
fn probe_within(occupied: &BTreeSet<i64>, target: i64, floor: i64, ceiling: i64) -> Option<i64> {
    (target..ceiling)
        .find(|c| !occupied.contains(c))
        .or_else(|| (floor..target).rev().find(|c| !occupied.contains(c)))
}

/// Evenly respaced keys (`0, step, 2*step, ...`) for `count` entries in order.
pub fn plan_renumber(count: usize, policy: &PositionPolicy) -> Vec<i64> {
    (0..count as i64).map(|i| i * policy.step).collect()
}

//! Transition engine.
//!
//! Every function here takes `&mut dyn StoreOps` and is meant to run inside a
//! single [`Store::atomically`](crate::ports::Store::atomically) call. None of
//! them await or hold state between calls; the store is the only state.
//!
//! - `dependency`: per-parent dependency set and processed map
//! - `cascade`: dependency removal, promotion and hard-delete walk
//! - `add` / `lifecycle` / `remove` / `control`: the sibling transitions
//! - `query`: read-only views

pub mod add;
pub mod cascade;
pub mod control;
pub mod dependency;
pub mod lifecycle;
pub mod placement;
pub mod query;
pub mod remove;

pub use self::add::{NewJob, add_flow, add_job};
pub use self::cascade::{CascadeOutcome, cascade, remove_parent_dependency_key};
pub use self::dependency::{Dependencies, Resolution};
pub use self::lifecycle::{FailOutcome, move_to_active, move_to_completed, move_to_failed, promote_delayed, retry_job};
pub use self::remove::remove_job;

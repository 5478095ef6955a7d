//! Staged reconciliation of scene references against pipeline outputs.
//!
//! Edits are accumulated into four buckets (imports, updates, renames,
//! deletes) and only touch the scene when the whole set is applied.

pub mod namespace;
pub mod scene;
pub mod staged;

pub use scene::{MemScene, SceneError, SceneOp, SceneRefs};
pub use staged::{ApplyOutcome, ImportOpts, StageError, StagedRef, StagedSet};

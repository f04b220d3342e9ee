//! Content-addressed shell state snapshots and deltas.
//!
//! Provides:
//! - `ShellState` / `StateDiff` - Snapshots and structural deltas with canonical encoding
//! - `StatePtr` - A base hash plus at most one diff hash
//! - `StateStore` - Typed storage over any `BlobStore`

pub mod error;
pub mod hash;
pub mod linediff;
pub mod mapdiff;
pub mod ptr;
pub mod state;
pub mod store;

pub use error::StateError;
pub use hash::{BaseHash, DiffHash, content_hash};
pub use linediff::{LineDiff, LineDiffError, LineRun};
pub use mapdiff::MapDiff;
pub use ptr::{RawStatePtr, StatePtr};
pub use state::{ShellState, ShellType, StateDiff, parse_version};
pub use store::{BlobStore, StateStore};

//! Per-screen remote shell state for the shellmux control plane.
//!
//! Provides:
//! - `RemoteSessionManager` - Resolve and reconcile the shell state each screen sees
//! - `RemoteTable` / `RemoteConn` - Live remote connections
//! - Storage implementations (memory)

pub mod manager;
pub mod records;
pub mod remote;
pub mod storage;
pub mod update;

pub use manager::{
    IdArgs, ManagerConfig, ManagerError, RemoteSessionManager, Requirements, ResolvedIds,
    ResolvedRemote,
};
pub use records::{FeState, Line, RemoteInstance, Screen, Session};
pub use remote::{RemoteConn, RemoteError, RemoteRef, RemoteTable, parse_full_remote_ref};
pub use storage::SessionStorage;
#[cfg(feature = "memory")]
pub use storage::MemoryStorage;
pub use update::SessionUpdate;

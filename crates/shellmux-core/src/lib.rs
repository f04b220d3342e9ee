//! Core building blocks for the shellmux control plane.
//!
//! This crate provides:
//! - `resolve` - Generic id/name/position resolution over `ResolveItem`s
//! - `BufferedPipe` / `PipeRegistry` - Deferred, signed, TTL-bounded output delivery
//! - `UpdateBus` - Broadcast + history for reconnecting clients
//! - `UiContext` and shared identifiers

pub mod context;
pub mod pipe;
pub mod resolver;
pub mod signing;
pub mod traits;
pub mod update_bus;

pub use context::UiContext;
pub use pipe::{BufferedPipe, PipeConfig, PipeError, PipeRegistry};
pub use resolver::{ResolveError, ResolveItem, format_strs, is_position_arg, resolve};
pub use signing::UrlSigner;
pub use traits::{LineId, RemoteId, RemotePtr, ScreenId, SessionId, StorageError};
pub use update_bus::UpdateBus;

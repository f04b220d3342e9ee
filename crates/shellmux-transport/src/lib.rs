//! Transport layer for the shellmux control plane.
//!
//! Provides:
//! - Signed retrieval of buffered pipe output over HTTP (feature: http)

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{buffered_pipe_handler, pipe_router};

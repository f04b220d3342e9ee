//! HTTP retrieval of buffered pipe output.
//!
//! `GET <endpoint>?key=..&nonce=..&hmac=..` streams a pipe's output as
//! `text/plain` once the URL signature checks out.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use shellmux_core::{PipeError, PipeRegistry};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

/// Capacity of the in-memory pipe between the pipe reader and the response body.
const STREAM_BUFFER: usize = 64 * 1024;

/// Router serving the registry's retrieval endpoint.
pub fn pipe_router(registry: Arc<PipeRegistry>) -> Router {
    let endpoint = registry.endpoint().to_string();
    Router::new()
        .route(&endpoint, get(buffered_pipe_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// Verify the signed query and stream the named pipe.
///
/// Responds `400` without a key, `401` on a bad signature and `404` for an
/// unknown or expired key. Once streaming has started the status is already
/// sent, so a failed write ends the body early instead.
pub async fn buffered_pipe_handler(
    State(registry): State<Arc<PipeRegistry>>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    let key = match registry.verify(registry.endpoint(), &query) {
        Ok(key) => key,
        Err(e @ PipeError::MissingParam(_)) => {
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
        Err(e) => {
            tracing::warn!("rejected buffered pipe request: {e}");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };
    let Some(pipe) = registry.get(key) else {
        return (StatusCode::NOT_FOUND, "buffered pipe not found").into_response();
    };

    let (mut writer, reader) = tokio::io::duplex(STREAM_BUFFER);
    tokio::spawn(async move {
        match pipe.write_to(&mut writer).await {
            Ok(written) => tracing::debug!(key = pipe.key(), written, "buffered pipe drained"),
            Err(e) => tracing::error!(key = pipe.key(), "buffered pipe write failed: {e}"),
        }
    });

    (
        [(header::CONTENT_TYPE, "text/plain")],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

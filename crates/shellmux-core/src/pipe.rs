//! Buffered rendezvous pipes.
//!
//! A [`BufferedPipe`] collects bytes from producers until a single reader
//! attaches with [`BufferedPipe::write_to`], which drains the backlog and then
//! follows live writes until the pipe is closed. Pipes live in a
//! [`PipeRegistry`] keyed by a random key and are evicted after a TTL whether
//! or not anyone ever read them.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Notify,
};
use uuid::Uuid;

use crate::signing::UrlSigner;

/// Default time a registered pipe stays reachable.
pub const DEFAULT_REGISTRY_TTL: Duration = Duration::from_secs(30);

/// Default retrieval endpoint.
pub const DEFAULT_PIPE_ENDPOINT: &str = "/api/buffered-pipe";

/// Pipe error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipeError {
    #[error("write on closed pipe")]
    Closed,
    #[error("invalid url signature")]
    BadSignature,
    #[error("missing query parameter: {0}")]
    MissingParam(&'static str),
}

/// Pipe registry configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// How long a pipe stays registered, regardless of its own timeout.
    #[serde(with = "duration_secs")]
    pub registry_ttl: Duration,
    /// Path of the retrieval endpoint used when building output URLs.
    pub endpoint: String,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            registry_ttl: DEFAULT_REGISTRY_TTL,
            endpoint: DEFAULT_PIPE_ENDPOINT.to_string(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[derive(Default)]
struct PipeState {
    buffer: Vec<u8>,
    closed: bool,
}

/// Write-buffering pipe with a single deferred reader.
pub struct BufferedPipe {
    key: String,
    state: Mutex<PipeState>,
    data_ready: Notify,
    signer: UrlSigner,
    endpoint: Arc<str>,
}

impl std::fmt::Debug for BufferedPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedPipe")
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl BufferedPipe {
    fn new(signer: UrlSigner, endpoint: Arc<str>) -> Self {
        Self {
            key: Uuid::new_v4().to_string(),
            state: Mutex::new(PipeState::default()),
            data_ready: Notify::new(),
            signer,
            endpoint,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registry key of this pipe.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the pipe has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of bytes buffered and not yet handed to a reader.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Append data to the buffer and wake the reader.
    ///
    /// Safe to call from many producers at once.
    ///
    /// # Errors
    /// Returns [`PipeError::Closed`] once the pipe is closed.
    pub fn write(&self, data: &[u8]) -> Result<usize, PipeError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(PipeError::Closed);
            }
            state.buffer.extend_from_slice(data);
        }
        self.data_ready.notify_waiters();
        Ok(data.len())
    }

    /// Close the pipe. Idempotent; wakes a blocked [`Self::write_to`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.data_ready.notify_waiters();
    }

    /// Stream everything written to this pipe into `w`.
    ///
    /// Drains the current backlog, then waits for further writes, returning
    /// once the pipe is closed and fully drained. Only one reader may call
    /// this at a time; concurrent readers would split the data between them.
    ///
    /// # Errors
    /// Returns the first error reported by `w`.
    pub async fn write_to<W>(&self, w: &mut W) -> std::io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut total = 0u64;
        loop {
            // Register interest before inspecting state so a write or close
            // between the check and the await is not missed.
            let notified = self.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (chunk, closed) = {
                let mut state = self.lock();
                (std::mem::take(&mut state.buffer), state.closed)
            };
            if !chunk.is_empty() {
                w.write_all(&chunk).await?;
                total += chunk.len() as u64;
            }
            if closed {
                w.flush().await?;
                return Ok(total);
            }
            w.flush().await?;
            notified.await;
        }
    }

    /// Signed URL from which the output of this pipe can be read.
    #[must_use]
    pub fn output_url(&self) -> String {
        let mut query = BTreeMap::new();
        query.insert("key".to_string(), self.key.clone());
        query.insert("nonce".to_string(), Uuid::new_v4().to_string());
        self.signer.signed_url(&self.endpoint, query)
    }
}

/// Keyed registry of live pipes.
///
/// Owned by the process (or a test); pipes are removed after the configured
/// TTL and closed on removal.
pub struct PipeRegistry {
    pipes: Mutex<HashMap<String, Arc<BufferedPipe>>>,
    config: PipeConfig,
    signer: UrlSigner,
    endpoint: Arc<str>,
}

impl PipeRegistry {
    /// Create a registry signing URLs with `secret`.
    #[must_use]
    pub fn new(config: PipeConfig, secret: impl AsRef<[u8]>) -> Arc<Self> {
        let endpoint: Arc<str> = Arc::from(config.endpoint.as_str());
        Arc::new(Self {
            pipes: Mutex::new(HashMap::new()),
            config,
            signer: UrlSigner::new(secret),
            endpoint,
        })
    }

    fn pipes(&self) -> MutexGuard<'_, HashMap<String, Arc<BufferedPipe>>> {
        self.pipes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retrieval endpoint path.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Create and register a pipe that closes itself after `timeout`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn create(self: &Arc<Self>, timeout: Duration) -> Arc<BufferedPipe> {
        let pipe = Arc::new(BufferedPipe::new(
            self.signer.clone(),
            Arc::clone(&self.endpoint),
        ));
        self.register(Arc::clone(&pipe));

        let weak_pipe = Arc::downgrade(&pipe);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(pipe) = weak_pipe.upgrade() {
                pipe.close();
            }
        });
        pipe
    }

    fn register(self: &Arc<Self>, pipe: Arc<BufferedPipe>) {
        let key = pipe.key().to_string();
        self.pipes().insert(key.clone(), pipe);

        let registry: Weak<Self> = Arc::downgrade(self);
        let ttl = self.config.registry_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(registry) = registry.upgrade() {
                registry.evict(&key);
            }
        });
    }

    fn evict(&self, key: &str) {
        let removed = self.pipes().remove(key);
        if let Some(pipe) = removed {
            pipe.close();
            tracing::info!(key, "removing buffered pipe");
        }
    }

    /// Look up a pipe by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<BufferedPipe>> {
        self.pipes().get(key).cloned()
    }

    /// Number of registered pipes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipes().len()
    }

    /// Whether no pipes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipes().is_empty()
    }

    /// Verify a retrieval request and return the pipe key it names.
    ///
    /// # Errors
    /// Returns [`PipeError::MissingParam`] if `key` is absent and
    /// [`PipeError::BadSignature`] if the HMAC does not match.
    pub fn verify<'q>(
        &self,
        path: &str,
        query: &'q BTreeMap<String, String>,
    ) -> Result<&'q str, PipeError> {
        let key = query.get("key").ok_or(PipeError::MissingParam("key"))?;
        if !self.signer.verify(path, query) {
            return Err(PipeError::BadSignature);
        }
        Ok(key.as_str())
    }

    /// Close and evict every pipe.
    pub fn shutdown(&self) {
        let drained: Vec<Arc<BufferedPipe>> = self.pipes().drain().map(|(_, p)| p).collect();
        for pipe in &drained {
            pipe.close();
        }
        tracing::debug!(count = drained.len(), "buffered pipe registry shut down");
    }
}

//! Caller-tunable transfer parameters.

use std::fmt;
use std::sync::Arc;

use crate::error::TransferError;
use crate::frame::{DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW, MAX_CHUNK_SIZE};
use crate::logging::{TracingLogger, TransferLogger};

/// Environment variable overriding the window.
pub const ENV_WINDOW: &str = "SLUICE_WINDOW";

/// Environment variable overriding the chunk size.
pub const ENV_CHUNK_SIZE: &str = "SLUICE_CHUNK_SIZE";

/// Window and chunk size for one transfer, plus where its logs go.
///
/// Buffered memory per session is bounded by `window_limit * chunk_size`.
#[derive(Clone)]
pub struct TransferConfig {
    /// Requests outstanding at once. A bounded connection (e.g.
    /// [`channel_pair`](crate::channel::channel_pair)) needs at least this
    /// many slots per direction or client and server deadlock.
    pub window_limit: usize,
    pub chunk_size: u32,
    pub logger: Option<Arc<dyn TransferLogger>>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            window_limit: DEFAULT_WINDOW,
            chunk_size: DEFAULT_CHUNK_SIZE,
            logger: Some(Arc::new(TracingLogger)),
        }
    }
}

impl fmt::Debug for TransferConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferConfig")
            .field("window_limit", &self.window_limit)
            .field("chunk_size", &self.chunk_size)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

impl TransferConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, window_limit: usize) -> Self {
        self.window_limit = window_limit;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn without_logger(mut self) -> Self {
        self.logger = None;
        self
    }

    /// Defaults overridden by `SLUICE_WINDOW` / `SLUICE_CHUNK_SIZE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading through `lookup`.
    /// Unparsable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_WINDOW) {
            match raw.trim().parse() {
                Ok(window) => config.window_limit = window,
                Err(_) => tracing::warn!(var = ENV_WINDOW, value = %raw, "ignoring unparsable window"),
            }
        }
        if let Some(raw) = lookup(ENV_CHUNK_SIZE) {
            match raw.trim().parse() {
                Ok(chunk) => config.chunk_size = chunk,
                Err(_) => tracing::warn!(var = ENV_CHUNK_SIZE, value = %raw, "ignoring unparsable chunk size"),
            }
        }
        config
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        if self.window_limit == 0 {
            return Err(TransferError::InvalidConfig {
                message: "window must allow at least one request".into(),
            });
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(TransferError::InvalidConfig {
                message: format!(
                    "chunk size {} outside 1..={}",
                    self.chunk_size, MAX_CHUNK_SIZE
                ),
            });
        }
        Ok(())
    }
}

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use thiserror::Error;

/// The failure domain of data loaders and component fetchers.
///
/// [`LoadError::NotFound`] and [`LoadError::Redirect`] are sentinels: a
/// [`Controller`](crate::Controller) intercepts them and converts them into
/// the corresponding status instead of treating them as errors, no matter
/// whether they came from the data loader or the component fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The loaded resource does not exist at this location.
    #[error("not found")]
    NotFound,
    /// Loading requires navigating somewhere else first.
    #[error("redirect to {0}")]
    Redirect(String),
    /// The load was aborted before it settled.
    #[error("aborted: {0}")]
    Aborted(String),
    /// Any other failure, kept as its rendered message.
    #[error("{0}")]
    Message(String),
}

impl LoadError {
    /// Wrap an arbitrary error.
    pub fn other(err: impl std::fmt::Display) -> Self {
        Self::Message(err.to_string())
    }
}

/// Cooperative cancellation signal handed to data loaders.
///
/// Aborting only signals intent; work actually stops when the loader
/// observes the signal. Loaders that never check it simply run to
/// completion, their result is discarded by the promise-identity guard.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    reason: Arc<Mutex<Option<String>>>,
}

impl AbortSignal {
    /// Create a signal that has not been aborted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the load this signal belongs to has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.reason.lock().map(|r| r.is_some()).unwrap_or(true)
    }

    /// The abort reason, once aborted.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|r| r.clone())
    }

    pub(crate) fn set(&self, reason: String) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert(reason);
        }
    }
}

/// Callback used to hand in-flight load futures to the host executor.
///
/// The engine never owns an executor. Whoever constructs the
/// [`Router`](crate::Router) injects a spawner, the same way a rendering
/// integration hands its scheduler to the router service.
pub type Spawner = Arc<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>;

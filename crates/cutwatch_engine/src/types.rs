use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

/// Connection lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Reconnecting {
        attempt: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),
    #[error("connect failed: {0}")]
    Connect(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("response carried no task id")]
    MissingTaskId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("task start failed: {0}")]
    Start(#[from] ApiError),
    #[error("no terminal state within {0:?}")]
    TimedOut(Duration),
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task cancelled")]
    Cancelled(Option<String>),
    #[error("watch detached before a terminal state was observed")]
    Detached,
}

/// Locks a mutex, recovering the data if a callback panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

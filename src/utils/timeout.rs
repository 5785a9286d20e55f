//! Timeout defaults and async wrappers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default connect/operation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest a session may sit between the first and last byte of one frame
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for open sessions during server shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut`, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)
}

/// Run a fallible `fut`, flattening its error with the timeout error.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(fut, duration).await?
}

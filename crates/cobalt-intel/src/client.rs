//! Shared contract implemented by every intel client (spec §4.2).

use std::time::Duration;

use cobalt_common::error::IntelErrorKind;

/// Soft error returned by a client; never fatal to the pipeline.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{client} intel error: {kind}")]
pub struct IntelError {
    pub client: &'static str,
    pub kind: IntelErrorKind,
}

pub type IntelResult<T> = Result<T, IntelError>;

/// Runs `fut` with a hard timeout, mapping elapsed time to a soft `Timeout` error.
pub async fn with_timeout<T, Fut>(
    client: &'static str,
    timeout: Duration,
    fut: Fut,
) -> IntelResult<T>
where
    Fut: std::future::Future<Output = IntelResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(inner) => inner,
        Err(_) => Err(IntelError {
            client,
            kind: IntelErrorKind::Timeout,
        }),
    }
}

//! Per-operation cancellation and timeout.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{StorageError, StorageResult};

/// Context passed into every storage operation.
///
/// The timeout bounds each single I/O step (one page fetch, one object get,
/// one file read), not the operation as a whole. Recursive operations call
/// [`OpContext::check`] on every iteration.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl OpContext {
    /// A context that is never cancelled and has no timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-step timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use an existing cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token cancelling this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The per-step timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the context was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with `Cancelled` if the context was cancelled.
    pub fn check(&self, path: &str) -> StorageResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled(path.to_string()));
        }
        Ok(())
    }

    /// Run one I/O step under the context.
    pub async fn run<T, F>(&self, path: &str, step: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        self.check(path)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StorageError::Cancelled(path.to_string())),
            result = with_deadline(self.timeout, step) => match result {
                Some(result) => result,
                None => Err(StorageError::TimedOut(path.to_string())),
            },
        }
    }
}

async fn with_deadline<T, F>(timeout: Option<Duration>, step: F) -> Option<T>
where
    F: Future<Output = T>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, step).await.ok(),
        None => Some(step.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let ctx = OpContext::new();
        let value = ctx.run("/a", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);

        let err = ctx
            .run::<(), _>("/a", async { Err(StorageError::NotFound("/a".to_string())) })
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound("/a".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_step() {
        let token = CancellationToken::new();
        let ctx = OpContext::new().with_cancellation(token.clone());
        token.cancel();

        assert!(ctx.is_cancelled());
        assert_eq!(ctx.check("/a"), Err(StorageError::Cancelled("/a".to_string())));
        let err = ctx.run("/a", async { Ok(()) }).await.unwrap_err();
        assert_eq!(err, StorageError::Cancelled("/a".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_during_step() {
        let token = CancellationToken::new();
        let ctx = OpContext::new().with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let err = ctx
            .run("/slow", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::Cancelled("/slow".to_string()));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let ctx = OpContext::new().with_timeout(Some(Duration::from_millis(10)));
        let err = ctx
            .run("/slow", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::TimedOut("/slow".to_string()));
    }
}

//! Retry Executor
//!
//! Runs remote operations with exponential backoff. Only failures accepted by
//! the retry predicate are attempted again; everything else, and the last
//! failure once retries run out, is returned to the caller.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::RemoteError;

/// Decides whether a failure should be attempted again.
pub type RetryPredicate = Arc<dyn Fn(&RemoteError) -> bool + Send + Sync>;

// == Retry Options ==
#[derive(Clone)]
pub struct RetryOptions {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout; an elapsed timeout is a retryable failure
    pub timeout: Option<Duration>,
    pub should_retry: RetryPredicate,
}

impl RetryOptions {
    /// Backoff before retry number `attempt + 1`: `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_predicate(
        mut self,
        should_retry: impl Fn(&RemoteError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Arc::new(should_retry);
        self
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            timeout: None,
            should_retry: Arc::new(|err: &RemoteError| err.retryable),
        }
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Result of a write performed through [`RetryExecutor::execute_idempotent`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteConfirmation<T> {
    /// This call performed the write
    Applied(T),
    /// The check call reported the effect was already in place
    AlreadyApplied,
}

// == Retry Executor ==
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    options: RetryOptions,
}

impl RetryExecutor {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Runs `operation` with this executor's options.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        Self::execute_with(&self.options, operation).await
    }

    /// Runs `operation` with explicit options.
    pub async fn execute_with<T, F, Fut>(
        options: &RetryOptions,
        mut operation: F,
    ) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let result = match options.timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::timeout(limit)),
                },
                None => operation().await,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= options.max_retries {
                debug!(attempts = attempt + 1, error = %err, "Retries exhausted");
                return Err(err);
            }
            if !(options.should_retry)(&err) {
                debug!(error = %err, "Failure is not retryable");
                return Err(err);
            }

            let delay = options.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Remote operation failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    // == Idempotent Write ==
    /// Performs a write that may already have taken effect.
    ///
    /// When `previously_attempted` is set, and before every retry, `check` is
    /// called first; if it reports the effect is in place, the write is
    /// skipped and [`WriteConfirmation::AlreadyApplied`] is returned.
    pub async fn execute_idempotent<T, C, CFut, W, WFut>(
        &self,
        previously_attempted: bool,
        check: C,
        write: W,
    ) -> Result<WriteConfirmation<T>, RemoteError>
    where
        C: Fn() -> CFut,
        CFut: Future<Output = Result<bool, RemoteError>>,
        W: Fn() -> WFut,
        WFut: Future<Output = Result<T, RemoteError>>,
    {
        let attempted = AtomicBool::new(previously_attempted);
        let (attempted, check, write) = (&attempted, &check, &write);

        self.execute(move || async move {
            if attempted.swap(true, Ordering::SeqCst) && check().await? {
                debug!("Write already applied, skipping");
                return Ok(WriteConfirmation::AlreadyApplied);
            }
            write().await.map(WriteConfirmation::Applied)
        })
        .await
    }
}

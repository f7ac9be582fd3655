//! Resilient action executor.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::consultant::{
    ResilienceCallback, ResilienceConsultant, ResilienceContext, ResilienceProposal,
};

/// Cached failure replayed while a fallthrough window is open.
struct Fallthrough<E> {
    error: E,
    identifier: String,
    until: Instant,
}

/// Executes fallible actions under the policies proposed by its consultants.
///
/// - No proposal: the error is returned after a single attempt.
/// - [`ResilienceProposal::Retry`]: the action is re-invoked until the retry
///   budget is consumed; the error of the final attempt is returned.
/// - [`ResilienceProposal::Fallthrough`]: the error is returned and cached;
///   further executions return the cached error without invoking the action
///   until the window closes.
pub struct ResilientActionExecutor<E> {
    consultants: Vec<Box<dyn ResilienceConsultant<E>>>,
    fallthrough: Mutex<Option<Fallthrough<E>>>,
}

impl<E> Default for ResilientActionExecutor<E> {
    fn default() -> Self {
        Self {
            consultants: Vec::new(),
            fallthrough: Mutex::new(None),
        }
    }
}

impl<E> ResilientActionExecutor<E> {
    /// Executor without consultants: every failure is returned immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consultant (builder style).
    #[must_use]
    pub fn with_consultant(mut self, consultant: impl ResilienceConsultant<E> + 'static) -> Self {
        self.add(consultant);
        self
    }

    /// Register a consultant. Consultants are asked in registration order.
    pub fn add(&mut self, consultant: impl ResilienceConsultant<E> + 'static) {
        self.consultants.push(Box::new(consultant));
    }

    /// Number of registered consultants.
    #[must_use]
    pub fn consultant_count(&self) -> usize {
        self.consultants.len()
    }

    /// Whether a fallthrough window is currently open.
    #[must_use]
    pub fn is_fallthrough_active(&self) -> bool {
        self.fallthrough
            .lock()
            .as_ref()
            .is_some_and(|f| f.until > Instant::now())
    }

    fn first_proposal(&self, context: &ResilienceContext<'_, E>) -> Option<ResilienceProposal> {
        self.consultants.iter().find_map(|c| c.consult(context))
    }
}

impl<E> ResilientActionExecutor<E>
where
    E: Clone + std::fmt::Display,
{
    /// Run `action` resiliently.
    ///
    /// # Errors
    ///
    /// Returns the last observed error once resilience is exhausted, or the
    /// cached error while a fallthrough window is open.
    pub async fn execute<T, F, Fut>(&self, identifier: &str, action: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(identifier, action, None).await
    }

    /// Like [`execute`](Self::execute), calling `callback` before every retry.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn execute_with_callback<T, F, Fut>(
        &self,
        identifier: &str,
        action: F,
        callback: &dyn ResilienceCallback<E>,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(identifier, action, Some(callback)).await
    }

    async fn run<T, F, Fut>(
        &self,
        identifier: &str,
        mut action: F,
        callback: Option<&dyn ResilienceCallback<E>>,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.cached_fallthrough_error() {
            return Err(cached);
        }

        let mut retries_done: u32 = 0;
        loop {
            let error = match action().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let context = ResilienceContext {
                error: &error,
                retries_done,
                identifier,
            };
            match self.first_proposal(&context) {
                None => {
                    debug!(
                        identifier,
                        consultants = self.consultants.len(),
                        error = %error,
                        "no resilience proposal, returning error"
                    );
                    return Err(error);
                }
                Some(ResilienceProposal::Retry {
                    max_retries,
                    wait_between_retries,
                }) => {
                    if retries_done >= max_retries {
                        warn!(
                            identifier,
                            retries_done,
                            max_retries,
                            error = %error,
                            "retry budget exhausted"
                        );
                        return Err(error);
                    }
                    if !wait_between_retries.is_zero() {
                        debug!(
                            identifier,
                            wait_ms = wait_between_retries.as_millis(),
                            "waiting before retry"
                        );
                        tokio::time::sleep(wait_between_retries).await;
                    }
                    retries_done += 1;
                    info!(identifier, retry = retries_done, max_retries, "retrying action");
                    if let Some(callback) = callback {
                        callback.before_retry(&ResilienceContext {
                            error: &error,
                            retries_done,
                            identifier,
                        });
                    }
                }
                Some(ResilienceProposal::Fallthrough { window }) => {
                    self.open_fallthrough(error.clone(), identifier, window);
                    return Err(error);
                }
            }
        }
    }

    /// Cached error while the window is open; clears an expired window.
    fn cached_fallthrough_error(&self) -> Option<E> {
        let mut guard = self.fallthrough.lock();
        let active = guard.as_ref()?;
        let now = Instant::now();
        if active.until > now {
            debug!(
                identifier = %active.identifier,
                remaining_ms = (active.until - now).as_millis(),
                "fallthrough active, replaying cached error"
            );
            return Some(active.error.clone());
        }
        *guard = None;
        None
    }

    fn open_fallthrough(&self, error: E, identifier: &str, window: Duration) {
        info!(identifier, window_ms = window.as_millis(), error = %error, "fallthrough activated");
        *self.fallthrough.lock() = Some(Fallthrough {
            error,
            identifier: identifier.to_owned(),
            until: Instant::now() + window,
        });
    }
}

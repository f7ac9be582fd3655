//! Resilience proposals and the consultants that produce them.

use std::fmt;
use std::time::Duration;

/// What to do about a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResilienceProposal {
    /// Re-invoke the action, at most `max_retries` times in total.
    Retry {
        /// Retry budget for one execution.
        max_retries: u32,
        /// Pause before each re-invocation.
        wait_between_retries: Duration,
    },
    /// Replay the failure without invoking the action until the window closes.
    Fallthrough {
        /// How long the failure is replayed.
        window: Duration,
    },
}

/// Information handed to consultants after a failed attempt.
#[derive(Debug)]
pub struct ResilienceContext<'a, E> {
    /// Error of the attempt that just failed.
    pub error: &'a E,
    /// Retries already performed within this execution.
    pub retries_done: u32,
    /// Free text naming the action, for diagnostics.
    pub identifier: &'a str,
}

/// Maps a failure to a proposal. Return `None` when the failure is none of
/// this consultant's business.
pub trait ResilienceConsultant<E>: Send + Sync {
    /// Inspect the failure and propose a reaction.
    fn consult(&self, context: &ResilienceContext<'_, E>) -> Option<ResilienceProposal>;
}

impl<E, F> ResilienceConsultant<E> for F
where
    F: Fn(&ResilienceContext<'_, E>) -> Option<ResilienceProposal> + Send + Sync,
{
    fn consult(&self, context: &ResilienceContext<'_, E>) -> Option<ResilienceProposal> {
        self(context)
    }
}

/// Hook invoked right before each retry.
pub trait ResilienceCallback<E>: Send + Sync {
    /// Called once per retry, after the wait and before the re-invocation.
    fn before_retry(&self, context: &ResilienceContext<'_, E>);
}

type Predicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

/// Proposes a bounded retry for every error accepted by its predicate.
pub struct RetryConsultant<E> {
    max_retries: u32,
    wait_between_retries: Duration,
    predicate: Predicate<E>,
}

impl<E> RetryConsultant<E> {
    /// Retry any error `max_retries` times, waiting `wait_between_retries` in between.
    #[must_use]
    pub fn new(max_retries: u32, wait_between_retries: Duration) -> Self {
        Self {
            max_retries,
            wait_between_retries,
            predicate: Box::new(|_| true),
        }
    }

    /// Only propose retries for errors matching `predicate`.
    #[must_use]
    pub fn when(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Box::new(predicate);
        self
    }
}

impl<E> ResilienceConsultant<E> for RetryConsultant<E> {
    fn consult(&self, context: &ResilienceContext<'_, E>) -> Option<ResilienceProposal> {
        (self.predicate)(context.error).then_some(ResilienceProposal::Retry {
            max_retries: self.max_retries,
            wait_between_retries: self.wait_between_retries,
        })
    }
}

impl<E> fmt::Debug for RetryConsultant<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConsultant")
            .field("max_retries", &self.max_retries)
            .field("wait_between_retries", &self.wait_between_retries)
            .finish_non_exhaustive()
    }
}

/// Proposes a fallthrough window for every error accepted by its predicate.
pub struct FallthroughConsultant<E> {
    window: Duration,
    predicate: Predicate<E>,
}

impl<E> FallthroughConsultant<E> {
    /// Replay any error for `window`.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            predicate: Box::new(|_| true),
        }
    }

    /// Only propose fallthrough for errors matching `predicate`.
    #[must_use]
    pub fn when(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Box::new(predicate);
        self
    }
}

impl<E> ResilienceConsultant<E> for FallthroughConsultant<E> {
    fn consult(&self, context: &ResilienceContext<'_, E>) -> Option<ResilienceProposal> {
        (self.predicate)(context.error).then_some(ResilienceProposal::Fallthrough {
            window: self.window,
        })
    }
}

impl<E> fmt::Debug for FallthroughConsultant<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallthroughConsultant")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

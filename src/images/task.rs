/// Per-image load lifecycle and the retry scheduler
///
/// A task moves forward only: pending -> loading -> loaded | failed.
/// The retry count is explicit state on the task; the scheduler decides
/// whether another attempt is allowed and sleeps between attempts.
use std::time::Duration;
use tracing::debug;

use crate::config::LoaderConfig;
use crate::dom::ElementId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadState {
    Pending,
    Loading,
    Loaded,
    Failed,
}

impl LoadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Failed)
    }
}

/// Retry budget for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt
    pub limit: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            limit: config.retry_limit,
            delay: config.retry_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LoaderConfig::default())
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Exhausted,
}

/// One deferred image's loading lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLoadTask {
    element: ElementId,
    source: String,
    candidate: Option<String>,
    retries: u32,
    policy: RetryPolicy,
    state: LoadState,
}

impl ImageLoadTask {
    /// `candidate` is the modern-format variant to try before `source`
    pub fn new(element: ElementId, source: String, candidate: Option<String>, policy: RetryPolicy) -> Self {
        Self {
            element,
            source,
            candidate,
            retries: 0,
            policy,
            state: LoadState::Pending,
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn candidate(&self) -> Option<&str> {
        self.candidate.as_deref()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Move to `next`. Returns `false` (and changes nothing) for a backwards
    /// move or any move out of a terminal state.
    fn advance(&mut self, next: LoadState) -> bool {
        if self.state.is_terminal() || next < self.state {
            return false;
        }
        self.state = next;
        true
    }

    pub fn begin(&mut self) -> bool {
        self.advance(LoadState::Loading)
    }

    /// The modern variant is tried once; later attempts use the source
    pub fn take_candidate(&mut self) -> Option<String> {
        self.candidate.take()
    }

    pub fn complete(&mut self) -> bool {
        self.advance(LoadState::Loaded)
    }

    pub fn fail(&mut self) -> bool {
        self.advance(LoadState::Failed)
    }

    /// Count a failed attempt against the budget
    pub fn record_failure(&mut self) -> RetryDecision {
        if self.state.is_terminal() || self.retries >= self.policy.limit {
            return RetryDecision::Exhausted;
        }
        self.retries += 1;
        RetryDecision::RetryAfter(self.policy.delay)
    }
}

/// Turns failed attempts into timed retries
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryScheduler;

impl RetryScheduler {
    /// Record a failure on `task`; sleep and return `true` if another
    /// attempt is allowed, `false` once the budget is spent.
    pub async fn next_attempt(&self, task: &mut ImageLoadTask) -> bool {
        match task.record_failure() {
            RetryDecision::RetryAfter(delay) => {
                debug!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    task.source(),
                    delay,
                    task.retries(),
                    task.policy().limit
                );
                tokio::time::sleep(delay).await;
                true
            }
            RetryDecision::Exhausted => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    fn task(limit: u32) -> ImageLoadTask {
        let doc = Document::new();
        ImageLoadTask::new(
            doc.root(),
            "/images/gown.jpg".to_string(),
            Some("/images/gown.webp".to_string()),
            RetryPolicy {
                limit,
                delay: Duration::from_secs(3),
            },
        )
    }

    #[test]
    fn test_states_only_move_forward() {
        let mut task = task(2);
        assert_eq!(task.state(), LoadState::Pending);
        assert!(task.begin());
        assert!(task.complete());
        assert!(!task.fail());
        assert!(!task.begin());
        assert_eq!(task.state(), LoadState::Loaded);
    }

    #[test]
    fn test_retry_count_never_exceeds_limit() {
        let mut task = task(2);
        task.begin();
        assert_eq!(task.record_failure(), RetryDecision::RetryAfter(Duration::from_secs(3)));
        assert_eq!(task.record_failure(), RetryDecision::RetryAfter(Duration::from_secs(3)));
        assert_eq!(task.record_failure(), RetryDecision::Exhausted);
        assert_eq!(task.record_failure(), RetryDecision::Exhausted);
        assert_eq!(task.retries(), 2);
    }

    #[test]
    fn test_candidate_is_taken_once() {
        let mut task = task(0);
        assert_eq!(task.take_candidate().as_deref(), Some("/images/gown.webp"));
        assert_eq!(task.take_candidate(), None);
        assert_eq!(task.candidate(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_sleeps_between_attempts() {
        let mut task = task(1);
        task.begin();
        let start = tokio::time::Instant::now();

        assert!(RetryScheduler.next_attempt(&mut task).await);
        let after_retry = start.elapsed();
        assert!(after_retry >= Duration::from_secs(3));

        assert!(!RetryScheduler.next_attempt(&mut task).await);
        assert_eq!(start.elapsed(), after_retry);
    }
}

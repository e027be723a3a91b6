//! Eventual-consistency poller.
//!
//! Azure acknowledges most mutations before their effect is visible: a certificate
//! order completes minutes later, a recovered secret takes a while to become
//! readable, a deleted vault lingers in the listing. [`StateWait`] re-checks a
//! resource at a fixed interval until it reaches one of the target states, fails,
//! or the deadline passes.
//!
//! ```text
//! Pending --> Pending | Target | Failed
//! Target (x continuous_target_occurrence) --> done
//! ```

use crate::{Result, VaultwrightError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::debug;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_NOT_FOUND_CHECKS: usize = 20;

/// What a single status check saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation<T> {
    /// The resource exists and reports `state`.
    Found {
        /// Value returned on success
        value: T,
        /// Observed state
        state: String,
    },
    /// The resource does not exist (yet).
    NotFound,
    /// The remote operation failed for good; the reason is surfaced verbatim.
    Failed(String),
}

impl<T> Observation<T> {
    /// Shorthand for [`Observation::Found`].
    pub fn found(value: T, state: impl Into<String>) -> Self {
        Self::Found {
            value,
            state: state.into(),
        }
    }
}

/// Absolute deadline of one lifecycle operation.
///
/// Created when the operation starts and shared by every wait inside it, so a
/// create that waits twice cannot exceed its configured timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    /// The instant the operation must finish by.
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// The configured operation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left; zero once passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// True once the deadline has passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Settings of one wait.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vaultwright::poll::{Deadline, Observation, StateWait};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> vaultwright::Result<()> {
/// let wait = StateWait::new(&["Provisioning"], &["Ready"], Deadline::after(Duration::from_secs(60)))
///     .with_poll_interval(Duration::from_millis(1));
///
/// let mut calls = 0;
/// let value = wait
///     .wait(|| {
///         calls += 1;
///         let state = if calls < 3 { "Provisioning" } else { "Ready" };
///         async move { Ok(Observation::found(calls, state)) }
///     })
///     .await?;
/// assert_eq!(value, 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StateWait {
    /// States that mean "keep waiting"
    pub pending: Vec<String>,
    /// States that mean "done"
    pub target: Vec<String>,
    /// Sleep before the first check
    pub delay: Duration,
    /// Fixed interval between checks
    pub poll_interval: Duration,
    /// Lower bound of the interval between checks
    pub min_timeout: Duration,
    /// Overall deadline
    pub deadline: Deadline,
    /// Consecutive not-found observations tolerated
    pub not_found_checks: usize,
    /// Consecutive target observations required
    pub continuous_target_occurrence: usize,
}

/// Loop progress, kept outside the loop future so a timeout can still report it.
#[derive(Debug, Default)]
struct Progress {
    last_state: Option<String>,
}

impl StateWait {
    /// Creates a wait with the default interval (10 s), 20 not-found checks and a
    /// single target occurrence.
    pub fn new(pending: &[&str], target: &[&str], deadline: Deadline) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            delay: Duration::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
            min_timeout: Duration::ZERO,
            deadline,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            continuous_target_occurrence: 1,
        }
    }

    /// Sleeps `delay` before the first check.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the fixed interval between checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the lower bound of the interval between checks.
    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    /// Sets how many consecutive not-found observations are tolerated.
    pub fn with_not_found_checks(mut self, checks: usize) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// Requires the target state `count` times in a row.
    pub fn with_continuous_target_occurrence(mut self, count: usize) -> Self {
        self.continuous_target_occurrence = count.max(1);
        self
    }

    /// Polls `refresh` until a target state is observed `continuous_target_occurrence`
    /// times in a row and returns the last value.
    ///
    /// # Errors
    ///
    /// - [`VaultwrightError::WaitTimeout`] when the deadline passes first
    /// - [`VaultwrightError::StateFailed`] when `refresh` reports a terminal failure
    /// - [`VaultwrightError::UnexpectedState`] for a state that is neither pending nor target
    /// - [`VaultwrightError::NotFoundChecksExceeded`] when the resource never shows up
    /// - any error returned by `refresh` itself
    pub async fn wait<T, F, Fut>(&self, refresh: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>>>,
    {
        debug!(
            pending = ?self.pending,
            target = ?self.target,
            timeout = ?self.deadline.timeout(),
            "waiting for state"
        );

        let mut progress = Progress::default();
        let outcome = timeout_at(self.deadline.instant(), self.run(refresh, &mut progress)).await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(VaultwrightError::WaitTimeout {
                expected: self.target.clone(),
                last_state: progress.last_state,
                timeout: self.deadline.timeout(),
            }),
        }
    }

    async fn run<T, F, Fut>(&self, mut refresh: F, progress: &mut Progress) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>>>,
    {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let interval = self.poll_interval.max(self.min_timeout);
        let mut target_occurrence = 0;
        let mut not_found = 0;
        let mut first = true;

        loop {
            if !first {
                sleep(interval).await;
            }
            first = false;

            match refresh().await? {
                Observation::Failed(reason) => {
                    return Err(VaultwrightError::StateFailed(reason));
                }
                Observation::NotFound => {
                    target_occurrence = 0;
                    not_found += 1;
                    debug!(not_found, "resource not found yet");
                    if not_found > self.not_found_checks {
                        return Err(VaultwrightError::NotFoundChecksExceeded { retries: not_found });
                    }
                }
                Observation::Found { value, state } => {
                    not_found = 0;
                    debug!(%state, "observed state");

                    if self.target.iter().any(|t| *t == state) {
                        target_occurrence += 1;
                        if target_occurrence >= self.continuous_target_occurrence {
                            return Ok(value);
                        }
                    } else if self.pending.iter().any(|p| *p == state) || self.pending.is_empty() {
                        target_occurrence = 0;
                    } else {
                        return Err(VaultwrightError::UnexpectedState {
                            state,
                            expected: self.target.clone(),
                        });
                    }
                    progress.last_state = Some(state);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn scripted(states: &'static [&'static str]) -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<Result<Observation<usize>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let refresh = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let state = states[n.min(states.len() - 1)];
            let observation = match state {
                "404" => Observation::NotFound,
                "boom" => Observation::Failed("remote failure".to_string()),
                other => Observation::found(n + 1, other),
            };
            std::future::ready(Ok(observation))
        };
        (calls, refresh)
    }

    fn wait_for_ready(timeout: Duration) -> StateWait {
        StateWait::new(&["Pending"], &["Ready"], Deadline::after(timeout))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_call_does_not_sleep() {
        let start = Instant::now();
        let (calls, refresh) = scripted(&["Ready"]);

        let value = wait_for_ready(Duration::from_secs(60)).wait(refresh).await.unwrap();

        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_then_ready_polls_at_interval() {
        let start = Instant::now();
        let (calls, refresh) = scripted(&["Pending", "Pending", "Pending", "Ready"]);

        let value = wait_for_ready(Duration::from_secs(600))
            .with_poll_interval(Duration::from_secs(10))
            .wait(refresh)
            .await
            .unwrap();

        assert_eq!(value, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_timeout_raises_interval() {
        let start = Instant::now();
        let (_, refresh) = scripted(&["Pending", "Ready"]);

        wait_for_ready(Duration::from_secs(600))
            .with_poll_interval(Duration::from_secs(1))
            .with_min_timeout(Duration::from_secs(15))
            .wait(refresh)
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_pending_times_out() {
        let start = Instant::now();
        let (calls, refresh) = scripted(&["Pending"]);

        let err = wait_for_ready(Duration::from_secs(60)).wait(refresh).await.unwrap_err();

        match err {
            VaultwrightError::WaitTimeout {
                expected,
                last_state,
                timeout,
            } => {
                assert_eq!(expected, vec!["Ready".to_string()]);
                assert_eq!(last_state.as_deref(), Some("Pending"));
                assert_eq!(timeout, Duration::from_secs(60));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(75));
        assert!(calls.load(Ordering::SeqCst) <= 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_returns_immediately() {
        let start = Instant::now();
        let (calls, refresh) = scripted(&["Pending", "boom"]);

        let err = wait_for_ready(Duration::from_secs(3600)).wait(refresh).await.unwrap_err();

        assert!(matches!(err, VaultwrightError::StateFailed(ref reason) if reason == "remote failure"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_error_is_terminal() {
        let err = wait_for_ready(Duration::from_secs(60))
            .wait(|| async { Err::<Observation<()>, _>(VaultwrightError::Transport("reset".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, VaultwrightError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_resets_continuous_occurrence() {
        let (calls, refresh) = scripted(&["Ready", "Ready", "Pending", "Ready", "Ready", "Ready"]);

        let value = wait_for_ready(Duration::from_secs(600))
            .with_continuous_target_occurrence(3)
            .wait(refresh)
            .await
            .unwrap();

        assert_eq!(value, 6);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_state() {
        let (_, refresh) = scripted(&["Pending", "Deleting"]);

        let err = wait_for_ready(Duration::from_secs(600)).wait(refresh).await.unwrap_err();

        assert!(matches!(err, VaultwrightError::UnexpectedState { ref state, .. } if state == "Deleting"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_state_waits_without_pending_list() {
        let (_, refresh) = scripted(&["Updating", "Ready"]);

        let value = StateWait::new(&[], &["Ready"], Deadline::after(Duration::from_secs(600)))
            .wait(refresh)
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_checks_exceeded() {
        let (calls, refresh) = scripted(&["404"]);

        let err = wait_for_ready(Duration::from_secs(3600))
            .with_not_found_checks(3)
            .wait(refresh)
            .await
            .unwrap_err();

        assert!(matches!(err, VaultwrightError::NotFoundChecksExceeded { retries: 4 }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_then_ready() {
        let (_, refresh) = scripted(&["404", "404", "Pending", "Ready"]);

        let value = wait_for_ready(Duration::from_secs(600)).wait(refresh).await.unwrap();
        assert_eq!(value, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_before_first_check() {
        let start = Instant::now();
        let (_, refresh) = scripted(&["Ready"]);

        wait_for_ready(Duration::from_secs(600))
            .with_delay(Duration::from_secs(30))
            .wait(refresh)
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_slow_refresh() {
        let err = wait_for_ready(Duration::from_secs(5))
            .wait(|| async {
                sleep(Duration::from_secs(60)).await;
                Ok(Observation::found((), "Ready"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, VaultwrightError::WaitTimeout { last_state: None, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_deadline() {
        let deadline = Deadline::after(Duration::from_secs(100));
        sleep(Duration::from_secs(40)).await;
        assert_eq!(deadline.remaining(), Duration::from_secs(60));
        assert!(!deadline.expired());
        sleep(Duration::from_secs(60)).await;
        assert!(deadline.expired());
    }
}

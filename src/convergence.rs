//! Resource convergence polling
//!
//! Cloud mutations are acknowledged long before they take effect; callers that
//! need the effect (an instance running, a job finished) poll remote state
//! until a condition holds. [`ConvergenceWait`] is that loop: evaluate, sleep
//! with a growing period, re-evaluate, give up at a deadline.
//!
//! # Contract
//! - `Ok(true)` - the condition held on some evaluation
//! - `Ok(false)` - the deadline passed or the wait was cancelled; this is a
//!   normal outcome, not an error
//! - `Err(_)` - the condition itself failed (a poll request errored)
//!
//! Callers for whom non-convergence is fatal use [`ConvergenceWait::require`],
//! which turns `Ok(false)` into [`RuntimeError::ConvergenceTimeout`]. That
//! escalation is always the caller's explicit choice.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RuntimeError};

/// Bounded poll-until-true loop with increasing sleep periods.
///
/// The first sleep lasts `initial_period`; each subsequent sleep doubles, up
/// to `max_period`. Total blocking never exceeds `max_wait` plus one condition
/// evaluation: the last sleep is truncated to the deadline and the condition
/// gets a final evaluation when the deadline is reached.
///
/// The condition must be safe to evaluate repeatedly and should only read
/// remote state.
#[derive(Debug, Clone)]
pub struct ConvergenceWait {
    initial_period: Duration,
    max_period: Duration,
    max_wait: Duration,
    cancel: Option<CancellationToken>,
}

impl ConvergenceWait {
    /// Create a wait with the given period schedule and deadline.
    ///
    /// A `max_period` below `initial_period` is raised to `initial_period`,
    /// keeping the period constant instead of shrinking it.
    pub fn new(initial_period: Duration, max_period: Duration, max_wait: Duration) -> Self {
        Self {
            initial_period,
            max_period: max_period.max(initial_period),
            max_wait,
            cancel: None,
        }
    }

    /// Attach a cancellation token. A cancelled wait stops at the next
    /// opportunity (before an evaluation or mid-sleep) and returns `Ok(false)`.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poll `condition` until it returns `true`, the deadline passes, or the
    /// wait is cancelled.
    ///
    /// The condition is evaluated at least once, even with a zero `max_wait`.
    pub async fn run<F, Fut>(&self, mut condition: F) -> Result<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let start = Instant::now();
        let mut period = self.initial_period;

        loop {
            if self.is_cancelled() {
                log::debug!("Convergence wait cancelled after {:?}", start.elapsed());
                return Ok(false);
            }

            if condition().await? {
                return Ok(true);
            }

            let elapsed = start.elapsed();
            if elapsed >= self.max_wait {
                log::debug!("Condition not met after {elapsed:?}, giving up");
                return Ok(false);
            }

            // 最后一次睡眠截断到截止时刻，醒来后做最终一次评估
            let pause = period.min(self.max_wait - elapsed);
            if !self.sleep(pause).await {
                log::debug!("Convergence wait cancelled after {:?}", start.elapsed());
                return Ok(false);
            }

            period = period
                .checked_mul(2)
                .unwrap_or(self.max_period)
                .min(self.max_period);
        }
    }

    /// Poll like [`run`](Self::run), but treat non-convergence as an error.
    ///
    /// `target` names what was being waited for and appears in the resulting
    /// [`RuntimeError::ConvergenceTimeout`].
    pub async fn require<F, Fut>(&self, provider: &str, target: &str, condition: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let start = Instant::now();
        if self.run(condition).await? {
            Ok(())
        } else {
            Err(RuntimeError::ConvergenceTimeout {
                provider: provider.to_string(),
                target: target.to_string(),
                waited_secs: start.elapsed().as_secs(),
            })
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// 睡眠，返回 false 表示睡眠期间被取消
    async fn sleep(&self, duration: Duration) -> bool {
        match &self.cancel {
            Some(token) => token
                .run_until_cancelled(tokio::time::sleep(duration))
                .await
                .is_some(),
            None => {
                tokio::time::sleep(duration).await;
                true
            }
        }
    }
}

/// Poll `condition` until it holds or `max_wait` elapses.
///
/// Convenience wrapper over [`ConvergenceWait`] for call sites that do not
/// need cancellation.
pub async fn await_until<F, Fut>(
    condition: F,
    initial_period: Duration,
    max_period: Duration,
    max_wait: Duration,
) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    ConvergenceWait::new(initial_period, max_period, max_wait)
        .run(condition)
        .await
}

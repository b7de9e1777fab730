//! Bounded retry with backoff
//!
//! Delays are slept *after* a failed attempt and only when another attempt
//! follows, so with the default policy (3 attempts, 1s/2s/4s):
//! - fail, fail, succeed  -> 1s + 2s of backoff
//! - fail, fail, fail     -> 1s + 2s of backoff, then the last error
//!
//! Progress is reported through a [`RetryObserver`] instead of ad-hoc logging.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Backoff schedule between attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Explicit sequence; failures past the end reuse the last delay
    Fixed { delays_ms: Vec<u64> },
    /// `initial_ms * 2^(n-1)`, optionally capped
    Exponential {
        initial_ms: u64,
        #[serde(default)]
        max_ms: Option<u64>,
    },
}

impl Backoff {
    /// Delay slept after the `failures`-th consecutive failure (1-based)
    pub fn delay_after(&self, failures: u32) -> Duration {
        let index = failures.saturating_sub(1);
        match self {
            Backoff::Fixed { delays_ms } => delays_ms
                .get(index as usize)
                .or_else(|| delays_ms.last())
                .map(|ms| Duration::from_millis(*ms))
                .unwrap_or(Duration::ZERO),
            Backoff::Exponential { initial_ms, max_ms } => {
                let shift = index.min(32);
                let value = initial_ms.saturating_mul(1u64 << shift);
                let capped = max_ms.map_or(value, |max| value.min(max));
                Duration::from_millis(capped)
            }
        }
    }
}

/// Retry policy applied to every underlying source read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed {
                delays_ms: vec![1_000, 2_000, 4_000],
            },
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed { delays_ms: vec![] },
        }
    }

    /// Total backoff slept when every attempt fails
    pub fn worst_case_delay(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|failures| self.backoff.delay_after(failures))
            .sum()
    }
}

/// Retry progress, emitted to a [`RetryObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    AttemptFailed {
        label: String,
        attempt: u32,
        error: String,
        retry_in: Option<Duration>,
    },
    Recovered {
        label: String,
        attempts: u32,
    },
    Exhausted {
        label: String,
        attempts: u32,
        error: String,
    },
}

impl RetryEvent {
    pub fn label(&self) -> &str {
        match self {
            RetryEvent::AttemptFailed { label, .. }
            | RetryEvent::Recovered { label, .. }
            | RetryEvent::Exhausted { label, .. } => label,
        }
    }
}

pub trait RetryObserver: Send + Sync {
    fn on_event(&self, event: &RetryEvent);
}

/// Logs retry progress through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_event(&self, event: &RetryEvent) {
        match event {
            RetryEvent::AttemptFailed { label, attempt, error, retry_in: Some(delay) } => {
                warn!("{} attempt {} failed: {} (retrying in {:?})", label, attempt, error, delay);
            }
            RetryEvent::AttemptFailed { label, attempt, error, retry_in: None } => {
                debug!("{} attempt {} failed: {}", label, attempt, error);
            }
            RetryEvent::Recovered { label, attempts } => {
                debug!("{} succeeded after {} attempts", label, attempts);
            }
            RetryEvent::Exhausted { label, attempts, error } => {
                error!("{} gave up after {} attempts: {}", label, attempts, error);
            }
        }
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RetryEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RetryEvent> {
        self.events.lock().clone()
    }

    /// Number of failed attempts recorded for `label`
    pub fn failures_for(&self, label: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RetryEvent::AttemptFailed { .. }) && e.label() == label)
            .count()
    }

    pub fn exhausted(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RetryEvent::Exhausted { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }
}

impl RetryObserver for RecordingObserver {
    fn on_event(&self, event: &RetryEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` is reached.
///
/// `op` receives the 1-based attempt number. The last error is returned on
/// exhaustion.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    observer: &dyn RetryObserver,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    observer.on_event(&RetryEvent::Recovered {
                        label: label.to_string(),
                        attempts: attempt,
                    });
                }
                return Ok(value);
            }
            Err(e) => {
                let last = attempt >= max_attempts;
                let retry_in = (!last).then(|| policy.backoff.delay_after(attempt));

                observer.on_event(&RetryEvent::AttemptFailed {
                    label: label.to_string(),
                    attempt,
                    error: e.to_string(),
                    retry_in,
                });

                match retry_in {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        observer.on_event(&RetryEvent::Exhausted {
                            label: label.to_string(),
                            attempts: attempt,
                            error: e.to_string(),
                        });
                        return Err(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_fixed_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.backoff.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.backoff.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.backoff.delay_after(9), Duration::from_secs(4));
        assert_eq!(policy.worst_case_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_schedule() {
        let backoff = Backoff::Exponential { initial_ms: 500, max_ms: Some(3_000) };
        assert_eq!(backoff.delay_after(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_after(2), Duration::from_millis(1_000));
        assert_eq!(backoff.delay_after(3), Duration::from_millis(2_000));
        assert_eq!(backoff.delay_after(4), Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_third_attempt() {
        let policy = RetryPolicy::default();
        let observer = RecordingObserver::new();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<u32, String> = retry(&policy, "flaky", &observer, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(format!("boom {}", attempt))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(observer.failures_for("flaky"), 2);
        assert!(observer.exhausted().is_empty());
        assert!(observer.events().contains(&RetryEvent::Recovered {
            label: "flaky".to_string(),
            attempts: 3,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::default();
        let observer = RecordingObserver::new();
        let start = Instant::now();

        let result: Result<(), String> = retry(&policy, "dead", &observer, |attempt| async move {
            Err(format!("failure {}", attempt))
        })
        .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert!(start.elapsed() <= Duration::from_secs(7));
        assert_eq!(observer.failures_for("dead"), 3);
        assert_eq!(observer.exhausted(), vec!["dead".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_is_silent() {
        let observer = RecordingObserver::new();
        let result: Result<u8, String> =
            retry(&RetryPolicy::default(), "ok", &observer, |_| async { Ok(1) }).await;

        assert_eq!(result, Ok(1));
        assert!(observer.events().is_empty());
    }

    proptest! {
        #[test]
        fn exponential_delays_never_decrease(initial in 1u64..10_000, cap in 1u64..1_000_000, n in 1u32..40) {
            let backoff = Backoff::Exponential { initial_ms: initial, max_ms: Some(cap) };
            prop_assert!(backoff.delay_after(n) <= backoff.delay_after(n + 1));
            prop_assert!(backoff.delay_after(n) <= Duration::from_millis(cap));
        }

        #[test]
        fn worst_case_is_sum_of_leading_delays(delays in proptest::collection::vec(0u64..5_000, 1..6), attempts in 1u32..8) {
            let policy = RetryPolicy { max_attempts: attempts, backoff: Backoff::Fixed { delays_ms: delays.clone() } };
            let expected: u64 = (1..attempts)
                .map(|i| *delays.get(i as usize - 1).unwrap_or(delays.last().unwrap()))
                .sum();
            prop_assert_eq!(policy.worst_case_delay(), Duration::from_millis(expected));
        }
    }
}

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::core::config::Settings;
use crate::services::model_client::{ModelError, TransportError};

/// Suspension point for backoff delays. Swapped for a recording fake in tests.
#[async_trait]
pub(crate) trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Jitter {
    /// Half the ceiling is fixed, the other half is drawn uniformly per retry.
    Equal,
    None,
}

#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Jitter,
}

/// A value together with the number of calls it took to get it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Attempted<T> {
    pub(crate) value: T,
    pub(crate) attempts: u32,
}

impl RetryPolicy {
    pub(crate) fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        jitter: Jitter,
    ) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay, jitter }
    }

    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let retry = settings.retry();
        let jitter = if retry.backoff_jitter { Jitter::Equal } else { Jitter::None };
        Self::new(retry.max_attempts, retry.backoff_base(), retry.backoff_max(), jitter)
    }

    #[cfg(test)]
    pub(crate) fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound of the wait after the `retry`-th failure (0-based): base * 2^retry, capped.
    pub(crate) fn ceiling(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub(crate) fn delay<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(retry);
        match self.jitter {
            Jitter::None => ceiling,
            Jitter::Equal => {
                let half = ceiling / 2;
                let spread = (ceiling - half).as_millis() as u64;
                half + Duration::from_millis(rng.gen_range(0..=spread))
            }
        }
    }

    /// Runs `op` until it succeeds, fails fatally, or the attempt budget is spent.
    pub(crate) async fn run<T, F, Fut>(
        &self,
        sleeper: &dyn Sleeper,
        label: &str,
        mut op: F,
    ) -> Result<Attempted<T>, ModelError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(Attempted { value, attempts: attempt }),
                Err(TransportError::Fatal(message)) => {
                    tracing::warn!(task = label, attempt, error = %message, "Fatal model error");
                    return Err(ModelError::Fatal { message, attempts: attempt });
                }
                Err(TransportError::Transient(message)) => {
                    if attempt >= self.max_attempts {
                        tracing::warn!(
                            task = label,
                            attempts = attempt,
                            error = %message,
                            "Transient model errors exhausted retry budget"
                        );
                        return Err(ModelError::TransientExhausted {
                            attempts: attempt,
                            last_error: message,
                        });
                    }

                    // The rng handle is not Send, so it must not live across the await.
                    let delay = self.delay(attempt - 1, &mut rand::thread_rng());
                    tracing::info!(
                        task = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient model error; backing off"
                    );
                    metrics::counter!("model_retries_total", "task" => label.to_string())
                        .increment(1);
                    sleeper.sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::test_support::RecordingSleeper;

    fn policy(jitter: Jitter) -> RetryPolicy {
        RetryPolicy::new(4, Duration::from_millis(500), Duration::from_secs(3), jitter)
    }

    #[test]
    fn ceiling_doubles_and_caps() {
        let policy = policy(Jitter::None);
        assert_eq!(policy.ceiling(0), Duration::from_millis(500));
        assert_eq!(policy.ceiling(1), Duration::from_millis(1000));
        assert_eq!(policy.ceiling(2), Duration::from_millis(2000));
        assert_eq!(policy.ceiling(3), Duration::from_millis(3000));
        assert_eq!(policy.ceiling(40), Duration::from_millis(3000));
    }

    #[test]
    fn equal_jitter_stays_within_upper_half() {
        let policy = policy(Jitter::Equal);
        let mut rng = StdRng::seed_from_u64(7);
        for retry in 0..6 {
            let ceiling = policy.ceiling(retry);
            for _ in 0..50 {
                let delay = policy.delay(retry, &mut rng);
                assert!(delay >= ceiling / 2, "{delay:?} below half of {ceiling:?}");
                assert!(delay <= ceiling, "{delay:?} above {ceiling:?}");
            }
        }
    }

    #[test]
    fn jitter_spreads_parallel_workers() {
        let policy = policy(Jitter::Equal);
        let mut first = StdRng::seed_from_u64(1);
        let mut second = StdRng::seed_from_u64(2);
        let a: Vec<_> = (0..4).map(|retry| policy.delay(retry, &mut first)).collect();
        let b: Vec<_> = (0..4).map(|retry| policy.delay(retry, &mut second)).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn settings_choose_between_jittered_and_fixed_waits() {
        let settings = crate::core::config::Settings::for_tests();
        let mut rng = StdRng::seed_from_u64(11);

        let fixed = RetryPolicy::from_settings(&settings.clone().with_backoff_jitter(false));
        assert_eq!(fixed.max_attempts(), 3);
        assert_eq!(fixed.delay(0, &mut rng), Duration::from_millis(10));
        assert_eq!(fixed.delay(4, &mut rng), Duration::from_millis(100));

        let jittered = RetryPolicy::from_settings(&settings);
        let delay = jittered.delay(3, &mut rng);
        assert!(delay >= Duration::from_millis(40) && delay <= Duration::from_millis(80));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, Jitter::None);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result = policy(Jitter::None)
            .run(&sleeper, "grading", |_| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(TransportError::Transient(String::from("429")))
                    } else {
                        Ok("payload")
                    }
                }
            })
            .await
            .expect("third call succeeds");

        assert_eq!(result, Attempted { value: "payload", attempts: 3 });
        assert_eq!(sleeper.delays(), vec![Duration::from_millis(500), Duration::from_millis(1000)]);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_budget() {
        let sleeper = RecordingSleeper::default();

        let err = policy(Jitter::None)
            .run(&sleeper, "extraction", |_| async {
                Err::<(), _>(TransportError::Transient(String::from("503")))
            })
            .await
            .expect_err("never succeeds");

        assert!(matches!(err, ModelError::TransientExhausted { attempts: 4, .. }));
        assert_eq!(sleeper.delays().len(), 3);
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let err = policy(Jitter::Equal)
            .run(&sleeper, "grading", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TransportError::Fatal(String::from("401 unauthorized"))) }
            })
            .await
            .expect_err("fatal");

        assert!(matches!(err, ModelError::Fatal { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays().is_empty());
    }
}

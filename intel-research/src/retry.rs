//! Retry with exponential backoff for a single agent step.
//!
//! Every attempt is reported to a [`StepObserver`] so the task's step history
//! reflects what actually happened, not only the final outcome. Exhaustion is
//! reported as a failed [`AgentStep`]; `run_or_fallback` then substitutes a
//! degraded value instead of aborting the workflow.

use async_trait::async_trait;
use chrono::Utc;
use intel_common::{AgentRetryConfig, Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::domain::AgentStep;

// ============================================================================
// Policy
// ============================================================================

/// Backoff configuration for agent steps.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.0]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::Config("max_attempts 至少为 1".into()));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(Error::Config(format!(
                "backoff_multiplier 必须 >= 1.0，当前值: {}",
                backoff_multiplier
            )));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter: false,
        })
    }

    pub fn from_config(config: &AgentRetryConfig) -> Result<Self> {
        Ok(Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_multiplier,
        )?
        .with_jitter(config.jitter))
    }

    /// Retries back to back. Used by tests and by callers that pace themselves.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the failed attempt with zero-based index `attempt`.
    ///
    /// `min(base * multiplier^attempt, max)`, optionally jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = (self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exp))
            .min(self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(secs.max(0.0));

        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }

    /// Run an essential step. Exhaustion returns the last error.
    pub async fn run<T, F, Fut>(
        &self,
        agent_name: &str,
        observer: &dyn StepObserver,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let started_at = Utc::now();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(agent = agent_name, attempt, "Agent step recovered after retries");
                    }
                    let step =
                        AgentStep::completed(agent_name, started_at, format!("{} 已完成", agent_name));
                    observer.on_event(StepEvent::Completed(step)).await;
                    return Ok(value);
                }
                Err(err) => {
                    let retry_in = if err.is_retryable() && attempt < max_attempts {
                        Some(self.delay_for(attempt - 1))
                    } else {
                        None
                    };

                    tracing::warn!(
                        agent = agent_name,
                        attempt,
                        max_attempts,
                        retry_in_ms = retry_in.map(|d| d.as_millis() as u64),
                        error = %err,
                        "Agent step attempt failed"
                    );
                    observer
                        .on_event(StepEvent::AttemptFailed {
                            agent_name: agent_name.to_string(),
                            attempt,
                            max_attempts,
                            error: err.to_string(),
                            retry_in,
                        })
                        .await;

                    if let Some(delay) = retry_in {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        continue;
                    }

                    let step = AgentStep::failed(
                        agent_name,
                        started_at,
                        format!("重试 {} 次后仍失败: {}", attempt, err),
                    );
                    observer.on_event(StepEvent::Exhausted(step)).await;
                    return Err(err);
                }
            }
        }
    }

    /// Run a step that has a degraded substitute.
    ///
    /// Never fails except on cancellation, which the workflow must see.
    pub async fn run_or_fallback<T, F, Fut>(
        &self,
        agent_name: &str,
        observer: &dyn StepObserver,
        fallback: T,
        op: F,
    ) -> Result<StepOutcome<T>>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        match self.run(agent_name, observer, op).await {
            Ok(value) => Ok(StepOutcome {
                value,
                degraded: false,
                last_error: None,
            }),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                tracing::warn!(agent = agent_name, error = %err, "Agent step degraded to fallback");
                Ok(StepOutcome {
                    value: fallback,
                    degraded: true,
                    last_error: Some(err),
                })
            }
        }
    }
}

/// Value produced by a step, possibly the fallback.
#[derive(Debug)]
pub struct StepOutcome<T> {
    pub value: T,
    pub degraded: bool,
    pub last_error: Option<Error>,
}

// ============================================================================
// Events
// ============================================================================

/// Attempt history emitted while a step runs.
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    AttemptFailed {
        agent_name: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
        /// `None` when no further attempt follows
        retry_in: Option<Duration>,
    },
    Completed(AgentStep),
    Exhausted(AgentStep),
}

impl StepEvent {
    /// The step record this event contributes to the task history.
    pub fn to_agent_step(&self) -> AgentStep {
        match self {
            Self::AttemptFailed {
                agent_name,
                attempt,
                max_attempts,
                error,
                ..
            } => AgentStep::attempt_failed(agent_name.as_str(), *attempt, *max_attempts, error),
            Self::Completed(step) | Self::Exhausted(step) => step.clone(),
        }
    }

    /// Whether this is the last event of the step.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::AttemptFailed { .. })
    }
}

/// Receives retry events as they happen.
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn on_event(&self, event: StepEvent);
}

/// Observer that drops every event.
pub struct NoopObserver;

#[async_trait]
impl StepObserver for NoopObserver {
    async fn on_event(&self, _event: StepEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentStepStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<StepEvent>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<StepEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StepObserver for Recorder {
        async fn on_event(&self, event: StepEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn failing_then_ok(
        failures: u32,
        err: fn() -> Error,
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<&'static str>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < failures { Err(err()) } else { Ok("ok") })
        };
        (calls, op)
    }

    fn service_error() -> Error {
        Error::Service("HTTP 503".into())
    }

    #[test]
    fn test_delay_for_is_exponential_and_capped() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_millis(500),
            2.0,
        )
        .unwrap();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn test_delay_with_jitter_stays_in_range() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000), Duration::from_secs(10), 2.0)
            .unwrap()
            .with_jitter(true);
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, 2.0).is_err());
        assert!(RetryPolicy::new(3, Duration::ZERO, Duration::ZERO, 0.5).is_err());
        assert!(RetryPolicy::new(3, Duration::ZERO, Duration::ZERO, f64::NAN).is_err());

        let policy = RetryPolicy::from_config(&AgentRetryConfig::default()).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert!(!policy.jitter);
    }

    #[tokio::test]
    async fn test_fails_k_times_then_succeeds() {
        let recorder = Recorder::default();
        let (calls, op) = failing_then_ok(2, service_error);

        let value = RetryPolicy::immediate(3)
            .run("市场热度分析", &recorder, op)
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let events = recorder.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], StepEvent::AttemptFailed { attempt: 1, .. }));
        assert!(matches!(events[1], StepEvent::AttemptFailed { attempt: 2, .. }));
        match &events[2] {
            StepEvent::Completed(step) => assert_eq!(step.status, AgentStepStatus::Completed),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_always_failing_returns_fallback() {
        let recorder = Recorder::default();
        let (calls, op) = failing_then_ok(u32::MAX, service_error);

        let outcome = RetryPolicy::immediate(3)
            .run_or_fallback("行业背景速览", &recorder, "fallback", op)
            .await
            .unwrap();

        assert_eq!(outcome.value, "fallback");
        assert!(outcome.degraded);
        assert!(matches!(outcome.last_error, Some(Error::Service(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let events = recorder.events();
        let failed_attempts = events
            .iter()
            .filter(|e| matches!(e, StepEvent::AttemptFailed { .. }))
            .count();
        assert_eq!(failed_attempts, 3);

        let finals: Vec<_> = events.iter().filter(|e| e.is_final()).collect();
        assert_eq!(finals.len(), 1);
        match finals[0] {
            StepEvent::Exhausted(step) => {
                assert_eq!(step.status, AgentStepStatus::Failed);
                assert_eq!(
                    step.error_message.as_deref(),
                    Some("重试 3 次后仍失败: Service error: HTTP 503")
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_last_attempt_has_no_retry_delay() {
        let recorder = Recorder::default();
        let (_, op) = failing_then_ok(u32::MAX, service_error);
        let _ = RetryPolicy::immediate(2).run("x", &recorder, op).await;

        let retry_ins: Vec<_> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                StepEvent::AttemptFailed { retry_in, .. } => Some(retry_in),
                _ => None,
            })
            .collect();
        assert_eq!(retry_ins, vec![Some(Duration::ZERO), None]);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let recorder = Recorder::default();
        let (calls, op) = failing_then_ok(u32::MAX, || Error::Validation("bad".into()));

        let err = RetryPolicy::immediate(5).run("x", &recorder, op).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], StepEvent::Exhausted(_)));
    }

    #[tokio::test]
    async fn test_cancellation_propagates_through_fallback() {
        let (_, op) = failing_then_ok(u32::MAX, || Error::Cancelled("task".into()));
        let result = RetryPolicy::immediate(3)
            .run_or_fallback("x", &NoopObserver, "fallback", op)
            .await;
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let (calls, op) = failing_then_ok(1, || Error::Timeout("60s".into()));
        let value = RetryPolicy::immediate(2).run("x", &NoopObserver, op).await.unwrap();
        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_event_to_agent_step() {
        let event = StepEvent::AttemptFailed {
            agent_name: "标的快速筛选".into(),
            attempt: 2,
            max_attempts: 3,
            error: "HTTP 429".into(),
            retry_in: Some(Duration::from_secs(2)),
        };
        let step = event.to_agent_step();
        assert_eq!(step.agent_name, "标的快速筛选");
        assert_eq!(step.error_message.as_deref(), Some("第 2/3 次尝试失败: HTTP 429"));
        assert!(!event.is_final());
    }
}

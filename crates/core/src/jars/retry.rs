//! Re-subscribes upstream after retryable failures.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cabinet::{BuildContext, StageJar};
use crate::context::PipelineContext;
use crate::definition::JarSpec;
use crate::error::FlowError;
use crate::flow::{Flow, ItemStream};
use crate::item::Item;
use crate::metrics;

const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER: f64 = 0.5;

/// Backoff and filtering rules of a retry stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure; `None` is unbounded.
    pub max_attempts: Option<u64>,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Randomization fraction in `[0, 1]`.
    pub jitter: f64,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl RetryPolicy {
    /// Reads `maxAttempts`, `minBackoff`, `maxBackoff`, `multiplier`,
    /// `jitter`, `includes` and `excludes`.
    pub fn from_spec(spec: &JarSpec) -> Result<Self, FlowError> {
        let max_attempts = match spec.i64_option("maxAttempts")? {
            None | Some(-1) => None,
            Some(n) if n >= 0 => Some(n as u64),
            Some(_) => {
                return Err(FlowError::invalid(
                    "maxAttempts",
                    "must be -1 or a non-negative integer",
                ))
            }
        };

        let min_backoff = spec.require_duration("minBackoff")?;
        let max_backoff = spec.require_duration("maxBackoff")?;
        if max_backoff < min_backoff {
            return Err(FlowError::invalid(
                "maxBackoff",
                "must not be smaller than minBackoff",
            ));
        }

        let multiplier = spec.f64_option("multiplier")?.unwrap_or(DEFAULT_MULTIPLIER);
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(FlowError::invalid("multiplier", "must be at least 1"));
        }

        let jitter = spec.f64_option("jitter")?.unwrap_or(DEFAULT_JITTER);
        if !(0.0..=1.0).contains(&jitter) {
            return Err(FlowError::invalid("jitter", "must be between 0 and 1"));
        }

        Ok(Self {
            max_attempts,
            min_backoff,
            max_backoff,
            multiplier,
            jitter,
            includes: spec.string_list("includes")?,
            excludes: spec.string_list("excludes")?,
        })
    }

    /// Delay before retry `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u64) as i32;
        let secs = self.min_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff)
    }

    /// Delay before retry `attempt`, randomized by `± jitter` using
    /// `random` in `[0, 1]`.
    pub fn delay(&self, attempt: u64, random: f64) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter == 0.0 {
            return base;
        }
        let factor = 1.0 + self.jitter * (2.0 * random.clamp(0.0, 1.0) - 1.0);
        let secs = (base.as_secs_f64() * factor).min(self.max_backoff.as_secs_f64());
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.max_backoff)
    }

    /// Whether `err` may be retried.
    ///
    /// With includes, some error in the cause chain must match one; with
    /// excludes, none may match any.
    pub fn is_retryable(&self, err: &FlowError) -> bool {
        let names = err.names();
        let matches = |patterns: &[String]| patterns.iter().any(|p| names.contains(p));

        let included = self.includes.is_empty() || matches(&self.includes);
        let excluded = !self.excludes.is_empty() && matches(&self.excludes);
        included && !excluded
    }

    fn exhausted(&self, attempts: u64) -> bool {
        self.max_attempts.is_some_and(|max| attempts > max)
    }
}

/// Uniform value in `[0, 1]` for jitter.
fn random_unit() -> f64 {
    let bits = (Uuid::new_v4().as_u128() >> 64) as u64;
    bits as f64 / u64::MAX as f64
}

/// Stage wrapping its input in [`retry_flow`].
pub struct RetryStageJar;

impl StageJar for RetryStageJar {
    fn new_stage(
        &self,
        spec: &JarSpec,
        _build: &BuildContext<'_>,
        input: Flow,
    ) -> Result<Flow, FlowError> {
        let policy = RetryPolicy::from_spec(spec)?;
        Ok(retry_flow(input, policy))
    }
}

/// Re-subscribes `input` after each retryable failure.
///
/// Before every re-subscription the last `streamPosition` seen per
/// `sourceUrl` is written into the context, so resumable sources continue
/// after the items already emitted. Dropping the stream during a backoff
/// cancels the wait.
pub fn retry_flow(input: Flow, policy: RetryPolicy) -> Flow {
    let policy = Arc::new(policy);
    Flow::new(move |ctx| {
        let state = RetryState {
            input: input.clone(),
            policy: Arc::clone(&policy),
            ctx,
            current: None,
            attempts: 0,
            done: false,
        };
        stream::unfold(state, next).boxed()
    })
}

struct RetryState {
    input: Flow,
    policy: Arc<RetryPolicy>,
    ctx: PipelineContext,
    current: Option<ItemStream>,
    attempts: u64,
    done: bool,
}

async fn next(mut state: RetryState) -> Option<(Result<Item, FlowError>, RetryState)> {
    loop {
        if state.done {
            return None;
        }
        let ctx = &state.ctx;
        let input = &state.input;
        let stream = state
            .current
            .get_or_insert_with(|| input.subscribe(ctx.clone()));

        match stream.next().await {
            Some(Ok(item)) => {
                if let (Some(url), Some(position)) =
                    (item.metadata.source_url(), item.metadata.stream_position())
                {
                    state.ctx.set_resume_position(url, position);
                }
                return Some((Ok(item), state));
            }
            None => return None,
            Some(Err(err)) => {
                state.current = None;

                if !state.policy.is_retryable(&err) {
                    debug!(
                        pipeline = ?state.ctx.pipeline(),
                        error = %err,
                        "Error is not retryable"
                    );
                    state.done = true;
                    return Some((Err(err), state));
                }

                state.attempts += 1;
                if state.policy.exhausted(state.attempts) {
                    warn!(
                        pipeline = ?state.ctx.pipeline(),
                        attempts = state.attempts - 1,
                        error = %err,
                        "Retries exhausted"
                    );
                    state.done = true;
                    return Some((Err(err), state));
                }

                let delay = state.policy.delay(state.attempts, random_unit());
                warn!(
                    pipeline = ?state.ctx.pipeline(),
                    attempt = state.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after failure"
                );
                metrics::RETRY_ATTEMPTS.inc();
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FailingSource;
    use serde_json::json;
    use std::io;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: Some(3),
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
            includes: vec![],
            excludes: vec![],
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = policy();
        let delays: Vec<u64> = (1..=6).map(|k| policy.delay(k, 0.9).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30]);
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..policy()
        };
        assert_eq!(policy.delay(2, 0.0), Duration::from_secs(1));
        assert_eq!(policy.delay(2, 0.5), Duration::from_secs(2));
        assert_eq!(policy.delay(2, 1.0), Duration::from_secs(3));
        assert_eq!(policy.delay(10, 1.0), Duration::from_secs(30));
    }

    #[test]
    fn test_from_spec() {
        let spec = JarSpec::new("retry")
            .with_option("maxAttempts", -1)
            .with_option("minBackoff", "1S")
            .with_option("maxBackoff", "30S")
            .with_option("includes", json!(["Io"]));
        let policy = RetryPolicy::from_spec(&spec).unwrap();

        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.jitter, 0.5);
        assert_eq!(policy.includes, vec!["Io"]);

        let missing = JarSpec::new("retry").with_option("maxBackoff", "1s");
        assert!(matches!(
            RetryPolicy::from_spec(&missing),
            Err(FlowError::MissingOption(option)) if option == "minBackoff"
        ));
    }

    #[test]
    fn test_includes_match_cause_chain() {
        let policy = RetryPolicy {
            includes: vec!["std::io::Error".to_string()],
            ..policy()
        };
        let io = FlowError::in_stage(
            Some("p"),
            "sink",
            FlowError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow")),
        );
        assert!(policy.is_retryable(&io));
        assert!(!policy.is_retryable(&FlowError::data("bad payload")));
    }

    // Excludes are matched against the excludes list, never the includes list
    #[test]
    fn test_excludes_are_checked_against_excludes() {
        let policy = RetryPolicy {
            excludes: vec!["PermissionDenied".to_string()],
            ..policy()
        };
        let denied = FlowError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        let refused = FlowError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "no"));
        assert!(!policy.is_retryable(&denied));
        assert!(policy.is_retryable(&refused));

        let both = RetryPolicy {
            includes: vec!["Io".to_string()],
            ..policy
        };
        assert!(!both.is_retryable(&denied));
        assert!(both.is_retryable(&refused));
        assert!(!both.is_retryable(&FlowError::data("x")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_resumes_after_last_position() {
        let source = FailingSource::new("mock://flaky", (0..5).map(|i| json!(i)).collect())
            .fail_at(3, 2);
        let subscriptions = source.subscriptions();
        let flow = retry_flow(source.into_flow(), policy());

        let items: Vec<Item> = flow
            .subscribe(PipelineContext::new())
            .map(|r| r.unwrap())
            .collect()
            .await;

        let positions: Vec<u64> = items
            .iter()
            .map(|i| i.metadata.stream_position().unwrap())
            .collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);
        assert_eq!(subscriptions.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let source = FailingSource::new("mock://down", vec![json!(1)]).fail_at(0, u32::MAX);
        let subscriptions = source.subscriptions();
        let flow = retry_flow(source.into_flow(), policy());

        let started = tokio::time::Instant::now();
        let results: Vec<_> = flow.subscribe(PipelineContext::new()).collect().await;

        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert_eq!(subscriptions.load(std::sync::atomic::Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 2 + 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_propagates_without_backoff() {
        let source = FailingSource::new("mock://bad", vec![json!(1)]).fail_at(0, 1);
        let subscriptions = source.subscriptions();
        let flow = retry_flow(
            source.into_flow(),
            RetryPolicy {
                includes: vec!["ConnectionRefused".to_string()],
                ..policy()
            },
        );

        let started = tokio::time::Instant::now();
        let results: Vec<_> = flow.subscribe(PipelineContext::new()).collect().await;

        assert!(results[0].is_err());
        assert_eq!(subscriptions.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}

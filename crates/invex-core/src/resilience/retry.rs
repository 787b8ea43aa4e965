//! Vision client wrapper adding per-attempt timeouts, backoff retries and a
//! circuit breaker.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use super::CircuitBreaker;
use crate::error::VisionError;
use crate::invoice::vision::{VisionClient, VisionResponse};
use crate::models::config::VisionConfig;

/// A [`VisionClient`] guarded by retry and a shared circuit breaker.
///
/// Only timeouts and connection failures are retried. The breaker sees one
/// outcome per call, after retries are exhausted.
pub struct ResilientVisionClient<C> {
    inner: C,
    breaker: Arc<CircuitBreaker>,
    backoff: ExponentialBuilder,
    timeout: Duration,
}

impl<C: VisionClient> ResilientVisionClient<C> {
    pub fn new(inner: C, breaker: Arc<CircuitBreaker>, config: &VisionConfig) -> Self {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(config.retry_min_delay_ms))
            .with_max_delay(Duration::from_millis(config.retry_max_delay_ms))
            .with_max_times(config.max_retries)
            .with_jitter();

        Self {
            inner,
            breaker,
            backoff,
            timeout: config.request_timeout(),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn attempt(
        &self,
        image_path: &Path,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<VisionResponse, VisionError> {
        tokio::time::timeout(
            self.timeout,
            self.inner.analyze_image(image_path, prompt, max_tokens),
        )
        .await
        .unwrap_or_else(|_| Err(VisionError::Timeout(self.timeout)))
    }
}

/// Hands the half-open probe back if the call is dropped before it finishes.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    held: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            warn!("Circuit probe abandoned, releasing the slot");
            self.breaker.release_probe();
        }
    }
}

#[async_trait]
impl<C: VisionClient> VisionClient for ResilientVisionClient<C> {
    async fn analyze_image(
        &self,
        image_path: &Path,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<VisionResponse, VisionError> {
        let mut probe = ProbeSlot {
            breaker: &self.breaker,
            held: self.breaker.try_acquire()?,
        };

        let attempt = || async { self.attempt(image_path, prompt, max_tokens).await };
        let result = attempt
            .retry(self.backoff.clone())
            .when(VisionError::is_retryable)
            .notify(|err, delay| warn!("Vision call failed ({}), retrying in {:?}", err, delay))
            .await;

        probe.held = false;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(e) if e.is_dependency_fault() => self.breaker.record_failure(),
            Err(_) => self.breaker.release_probe(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Step {
        Answer,
        Fail(fn() -> VisionError),
        Hang,
    }

    struct ScriptedClient {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VisionClient for ScriptedClient {
        async fn analyze_image(
            &self,
            _image_path: &Path,
            _prompt: &str,
            _max_tokens: u32,
        ) -> Result<VisionResponse, VisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Answer);
            match step {
                Step::Answer => Ok(VisionResponse {
                    text: "{}".to_string(),
                    model: "mock".to_string(),
                    error: None,
                }),
                Step::Fail(make) => Err(make()),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(VisionResponse::default())
                }
            }
        }
    }

    fn unavailable() -> VisionError {
        VisionError::Unavailable("connection refused".into())
    }

    fn api_error() -> VisionError {
        VisionError::Api("401 Unauthorized".into())
    }

    fn config() -> VisionConfig {
        VisionConfig {
            max_retries: 2,
            retry_min_delay_ms: 10,
            retry_max_delay_ms: 20,
            request_timeout_secs: 5,
            failure_threshold: 2,
            cooldown_secs: 60,
            ..VisionConfig::default()
        }
    }

    fn guarded(steps: Vec<Step>) -> ResilientVisionClient<Arc<ScriptedClient>> {
        let config = config();
        ResilientVisionClient::new(
            Arc::new(ScriptedClient::new(steps)),
            Arc::new(CircuitBreaker::from_config(&config)),
            &config,
        )
    }

    async fn call(
        client: &ResilientVisionClient<Arc<ScriptedClient>>,
    ) -> Result<VisionResponse, VisionError> {
        client.analyze_image(Path::new("invoice.png"), "prompt", 64).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let client = guarded(vec![Step::Fail(unavailable), Step::Fail(unavailable), Step::Answer]);
        let response = call(&client).await.unwrap();

        assert_eq!(response.model, "mock");
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.breaker().state().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_count_once() {
        let client = guarded(vec![Step::Fail(unavailable); 3]);
        let err = call(&client).await.unwrap_err();

        assert!(matches!(err, VisionError::Unavailable(_)));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.breaker().state().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_errors_pass_through() {
        let client = guarded(vec![Step::Fail(api_error)]);
        let err = call(&client).await.unwrap_err();

        assert!(matches!(err, VisionError::Api(_)));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.breaker().state().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout() {
        let client = guarded(vec![Step::Hang, Step::Hang, Step::Hang]);
        let err = call(&client).await.unwrap_err();

        assert!(matches!(err, VisionError::Timeout(d) if d == Duration::from_secs(5)));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_call() {
        let client = guarded(vec![Step::Fail(unavailable); 6]);
        call(&client).await.unwrap_err();
        call(&client).await.unwrap_err();
        assert!(client.breaker().state().is_open);

        let calls = client.inner.calls.load(Ordering::SeqCst);
        let err = call(&client).await.unwrap_err();
        assert!(matches!(err, VisionError::CircuitOpen { .. }));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), calls);

        // After the cooldown a probe goes through and closes the circuit.
        tokio::time::advance(Duration::from_secs(60)).await;
        client.inner.steps.lock().unwrap().clear();
        call(&client).await.unwrap();
        assert!(!client.breaker().state().is_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_releases_circuit() {
        let client = guarded(vec![Step::Fail(unavailable); 6]);
        call(&client).await.unwrap_err();
        call(&client).await.unwrap_err();
        assert!(client.breaker().state().is_open);

        tokio::time::advance(Duration::from_secs(61)).await;
        {
            let mut steps = client.inner.steps.lock().unwrap();
            steps.clear();
            steps.push_back(Step::Hang);
        }
        let cancelled = tokio::time::timeout(Duration::from_secs(1), call(&client)).await;
        assert!(cancelled.is_err());
        assert_eq!(client.breaker().state().state, CircuitState::Open);

        // The next caller gets the probe and closes the circuit.
        call(&client).await.unwrap();
        assert_eq!(client.breaker().state().state, CircuitState::Closed);
    }
}

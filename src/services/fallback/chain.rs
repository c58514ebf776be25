//! Model Fallback Chain
//!
//! Streams a completion from the first configured model that answers.
//! Models are tried in priority order; a failure switches to the next model
//! unless it was a cancellation or part of the answer already reached the
//! consumer. Every call runs under the per-call timeout and the Work's abort
//! handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use autoprovider_core::UnifiedStreamEvent;
use autoprovider_llm::{ChatMessage, LlmError, LlmProvider, LlmRequestOptions, LlmResponse};

/// Capacity of the per-attempt relay channel.
const RELAY_CAPACITY: usize = 256;

/// Reasons a model call can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Model is not available/configured
    Unavailable,
    /// Call timed out
    Timeout,
    /// Provider returned an error
    Error,
    /// Rate limited
    RateLimited,
    /// Network/connection error
    NetworkError,
    /// Invalid request or response
    InvalidResponse,
    /// Aborted by the caller
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Unavailable => write!(f, "unavailable"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Error => write!(f, "error"),
            FailureReason::RateLimited => write!(f, "rate_limited"),
            FailureReason::NetworkError => write!(f, "network_error"),
            FailureReason::InvalidResponse => write!(f, "invalid_response"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FailureReason {
    /// Check if this failure reason should trigger a fallback
    pub fn should_fallback(&self) -> bool {
        !matches!(self, FailureReason::Cancelled)
    }

    /// Classify a provider error
    pub fn from_llm_error(err: &LlmError) -> Self {
        match err {
            LlmError::AuthenticationFailed { .. }
            | LlmError::ModelNotFound { .. }
            | LlmError::ProviderUnavailable { .. } => FailureReason::Unavailable,
            LlmError::RateLimited { .. } => FailureReason::RateLimited,
            LlmError::NetworkError { .. } => FailureReason::NetworkError,
            LlmError::Timeout { .. } => FailureReason::Timeout,
            LlmError::InvalidRequest { .. } | LlmError::ParseError { .. } => FailureReason::InvalidResponse,
            LlmError::Cancelled => FailureReason::Cancelled,
            LlmError::ServerError { .. } | LlmError::Other { .. } => FailureReason::Error,
        }
    }
}

/// Errors from fallback execution
#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("No models configured")]
    NoModels,

    #[error("All models in fallback chain failed: {0}")]
    AllModelsFailed(String),

    /// Failed after part of the answer was forwarded; switching models would duplicate output
    #[error("Model call failed mid-stream: {0}")]
    ExecutionFailed(String),

    #[error("Model call cancelled")]
    Cancelled,
}

/// Result type for fallback operations
pub type FallbackResult<T> = Result<T, FallbackError>;

/// Record of a single model attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackAttempt {
    /// Model that was tried
    pub model: String,
    pub success: bool,
    pub failure_reason: Option<FailureReason>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub started_at: String,
}

impl FallbackAttempt {
    /// Create a successful attempt record
    pub fn success(model: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            model: model.into(),
            success: true,
            failure_reason: None,
            error_message: None,
            duration_ms,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Create a failed attempt record
    pub fn failure(
        model: impl Into<String>,
        reason: FailureReason,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            model: model.into(),
            success: false,
            failure_reason: Some(reason),
            error_message: Some(error.into()),
            duration_ms,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Log of all attempts of one call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackExecutionLog {
    pub attempts: Vec<FallbackAttempt>,
    pub total_duration_ms: u64,
    /// Model that answered (if any)
    pub successful_model: Option<String>,
}

impl FallbackExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_attempt(&mut self, attempt: FallbackAttempt) {
        self.total_duration_ms += attempt.duration_ms;
        if attempt.success {
            self.successful_model = Some(attempt.model.clone());
        }
        self.attempts.push(attempt);
    }

    /// Number of failed attempts before success
    pub fn failed_attempts_count(&self) -> usize {
        self.attempts.iter().filter(|a| !a.success).count()
    }
}

/// Ordered list of models with fallback.
#[derive(Clone)]
pub struct ModelFallbackChain {
    providers: Vec<Arc<dyn LlmProvider>>,
    call_timeout: Duration,
}

impl ModelFallbackChain {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, call_timeout: Duration) -> Self {
        Self {
            providers,
            call_timeout,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Highest-priority model; its context window sizes the prompt.
    pub fn primary(&self) -> Option<&Arc<dyn LlmProvider>> {
        self.providers.first()
    }

    /// Stream a completion, forwarding events to `tx`.
    pub async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        abort: &CancellationToken,
    ) -> FallbackResult<(LlmResponse, FallbackExecutionLog)> {
        if self.providers.is_empty() {
            return Err(FallbackError::NoModels);
        }

        let mut log = FallbackExecutionLog::new();
        let mut last_error = String::new();

        for provider in &self.providers {
            if abort.is_cancelled() {
                return Err(FallbackError::Cancelled);
            }

            let model = provider.config().display_name().to_string();
            info!(model = %model, "[FallbackChain] calling model");
            let started = Instant::now();
            let forwarded = Arc::new(AtomicBool::new(false));

            let result = self
                .attempt(provider.as_ref(), messages.clone(), tx.clone(), abort, forwarded.clone())
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    info!(model = %model, duration_ms, "[FallbackChain] model answered");
                    log.add_attempt(FallbackAttempt::success(&model, duration_ms));
                    return Ok((response, log));
                }
                Err(e) => {
                    let reason = FailureReason::from_llm_error(&e);
                    let message = e.to_string();
                    log.add_attempt(FallbackAttempt::failure(&model, reason, &message, duration_ms));

                    if !reason.should_fallback() {
                        info!(model = %model, "[FallbackChain] call cancelled");
                        return Err(FallbackError::Cancelled);
                    }
                    if forwarded.load(Ordering::SeqCst) {
                        error!(model = %model, "[FallbackChain] failed after streaming began: {}", message);
                        return Err(FallbackError::ExecutionFailed(message));
                    }
                    warn!(model = %model, reason = %reason, "[FallbackChain] model failed, trying next: {}", message);
                    last_error = format!("{}: {}", model, message);
                }
            }
        }

        error!(attempts = log.attempts.len(), "[FallbackChain] all models failed");
        Err(FallbackError::AllModelsFailed(last_error))
    }

    /// One model call relayed through a private channel, so the chain knows
    /// whether anything reached the consumer before a failure.
    async fn attempt(
        &self,
        provider: &dyn LlmProvider,
        messages: Vec<ChatMessage>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        abort: &CancellationToken,
        forwarded: Arc<AtomicBool>,
    ) -> Result<LlmResponse, LlmError> {
        let (relay_tx, mut relay_rx) = mpsc::channel::<UnifiedStreamEvent>(RELAY_CAPACITY);
        let relay = tokio::spawn(async move {
            while let Some(event) = relay_rx.recv().await {
                forwarded.store(true, Ordering::SeqCst);
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        let seconds = self.call_timeout.as_secs();
        let call = provider.stream_message(messages, relay_tx, LlmRequestOptions::default());
        let result = tokio::select! {
            biased;
            _ = abort.cancelled() => Err(LlmError::Cancelled),
            outcome = tokio::time::timeout(self.call_timeout, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout { seconds }),
            },
        };

        // The call future (and its sender) is gone; let the relay flush.
        let _ = relay.await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use autoprovider_llm::{LlmResult, ModelConfig, StopReason, UsageStats};

    /// Replays fixed deltas, then answers or fails.
    struct ScriptedProvider {
        config: ModelConfig,
        deltas: Vec<String>,
        failure: Option<LlmError>,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn answering(label: &str, deltas: &[&str]) -> Arc<dyn LlmProvider> {
            Arc::new(Self::build(label, deltas, None, Duration::ZERO))
        }

        fn failing(label: &str, deltas: &[&str], error: LlmError) -> Arc<dyn LlmProvider> {
            Arc::new(Self::build(label, deltas, Some(error), Duration::ZERO))
        }

        fn slow(label: &str, delay: Duration) -> Arc<dyn LlmProvider> {
            Arc::new(Self::build(label, &["late"], None, delay))
        }

        fn build(label: &str, deltas: &[&str], failure: Option<LlmError>, delay: Duration) -> Self {
            Self {
                config: ModelConfig {
                    label: label.to_string(),
                    model: label.to_string(),
                    ..Default::default()
                },
                deltas: deltas.iter().map(|d| d.to_string()).collect(),
                failure,
                delay,
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn model(&self) -> &str {
            &self.config.model
        }

        fn config(&self) -> &ModelConfig {
            &self.config
        }

        async fn send_message(&self, _messages: Vec<ChatMessage>, _opts: LlmRequestOptions) -> LlmResult<LlmResponse> {
            Err(LlmError::Other {
                message: "not scripted".into(),
            })
        }

        async fn stream_message(
            &self,
            _messages: Vec<ChatMessage>,
            tx: mpsc::Sender<UnifiedStreamEvent>,
            _opts: LlmRequestOptions,
        ) -> LlmResult<LlmResponse> {
            tokio::time::sleep(self.delay).await;
            for delta in &self.deltas {
                let _ = tx
                    .send(UnifiedStreamEvent::TextDelta {
                        content: delta.clone(),
                    })
                    .await;
            }
            if let Some(err) = &self.failure {
                return Err(err.clone());
            }
            Ok(LlmResponse {
                content: Some(self.deltas.concat()),
                thinking: None,
                stop_reason: StopReason::EndTurn,
                usage: Some(UsageStats::new(10, 5)),
                model: self.config.model.clone(),
            })
        }
    }

    fn collect(mut rx: mpsc::Receiver<UnifiedStreamEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let UnifiedStreamEvent::TextDelta { content } = event {
                out.push(content);
            }
        }
        out
    }

    fn network_error() -> LlmError {
        LlmError::NetworkError {
            message: "connection reset".into(),
        }
    }

    // ── Classification ──

    #[test]
    fn test_failure_classification() {
        assert_eq!(FailureReason::from_llm_error(&LlmError::Cancelled), FailureReason::Cancelled);
        assert_eq!(
            FailureReason::from_llm_error(&LlmError::Timeout { seconds: 1 }),
            FailureReason::Timeout
        );
        assert_eq!(FailureReason::from_llm_error(&network_error()), FailureReason::NetworkError);
        assert!(!FailureReason::Cancelled.should_fallback());
        assert!(FailureReason::RateLimited.should_fallback());
    }

    // ── Chain execution ──

    #[tokio::test]
    async fn test_primary_answers() {
        let chain = ModelFallbackChain::new(
            vec![ScriptedProvider::answering("a", &["he", "llo"])],
            Duration::from_secs(5),
        );
        let (tx, rx) = mpsc::channel(16);
        let (response, log) = chain.stream(vec![], tx, &CancellationToken::new()).await.unwrap();
        assert_eq!(response.content.as_deref(), Some("hello"));
        assert_eq!(log.successful_model.as_deref(), Some("a"));
        assert_eq!(collect(rx), vec!["he", "llo"]);
    }

    #[tokio::test]
    async fn test_falls_back_before_output() {
        let chain = ModelFallbackChain::new(
            vec![
                ScriptedProvider::failing("a", &[], network_error()),
                ScriptedProvider::answering("b", &["ok"]),
            ],
            Duration::from_secs(5),
        );
        let (tx, rx) = mpsc::channel(16);
        let (response, log) = chain.stream(vec![], tx, &CancellationToken::new()).await.unwrap();
        assert_eq!(response.model, "b");
        assert_eq!(log.failed_attempts_count(), 1);
        assert_eq!(collect(rx), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_no_fallback_after_output() {
        let chain = ModelFallbackChain::new(
            vec![
                ScriptedProvider::failing("a", &["partial"], network_error()),
                ScriptedProvider::answering("b", &["ok"]),
            ],
            Duration::from_secs(5),
        );
        let (tx, rx) = mpsc::channel(16);
        let err = chain.stream(vec![], tx, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FallbackError::ExecutionFailed(_)));
        assert_eq!(collect(rx), vec!["partial"]);
    }

    #[tokio::test]
    async fn test_all_models_fail() {
        let chain = ModelFallbackChain::new(
            vec![
                ScriptedProvider::failing("a", &[], network_error()),
                ScriptedProvider::failing("b", &[], LlmError::Timeout { seconds: 1 }),
            ],
            Duration::from_secs(5),
        );
        let (tx, _rx) = mpsc::channel(16);
        let err = chain.stream(vec![], tx, &CancellationToken::new()).await.unwrap_err();
        match err {
            FallbackError::AllModelsFailed(last) => assert!(last.starts_with("b:")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_moves_to_next_model() {
        let chain = ModelFallbackChain::new(
            vec![
                ScriptedProvider::slow("slow", Duration::from_secs(5)),
                ScriptedProvider::answering("fast", &["done"]),
            ],
            Duration::from_millis(50),
        );
        let (tx, _rx) = mpsc::channel(16);
        let (response, log) = chain.stream(vec![], tx, &CancellationToken::new()).await.unwrap();
        assert_eq!(response.model, "fast");
        assert_eq!(log.attempts[0].failure_reason, Some(FailureReason::Timeout));
    }

    #[tokio::test]
    async fn test_abort_stops_without_fallback() {
        let chain = ModelFallbackChain::new(
            vec![
                ScriptedProvider::slow("slow", Duration::from_secs(5)),
                ScriptedProvider::answering("fast", &["done"]),
            ],
            Duration::from_secs(10),
        );
        let abort = CancellationToken::new();
        let trigger = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let (tx, rx) = mpsc::channel(16);
        let err = chain.stream(vec![], tx, &abort).await.unwrap_err();
        assert!(matches!(err, FallbackError::Cancelled));
        assert!(collect(rx).is_empty());
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let chain = ModelFallbackChain::new(vec![], Duration::from_secs(1));
        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            chain.stream(vec![], tx, &CancellationToken::new()).await,
            Err(FallbackError::NoModels)
        ));
    }
}

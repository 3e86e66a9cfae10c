//! ExternalServiceClient - queue, retry and classification around one transport
//!
//! Every call goes through the same pipeline:
//!
//! ```text
//! call -> AdmissionQueue::enqueue -> RetryOrchestrator::execute -> transport
//! ```
//!
//! Whatever goes wrong, the caller gets an [`ApiError`] built from the
//! taxonomy; raw faults are only logged (sanitized).

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::classify::ErrorClassifier;
use crate::config::{ClientConfig, ConfigError, SluiceConfig};
use crate::domain::{ApiError, ErrorCode, ErrorContext, Fault};
use crate::observability::QueueStats;
use crate::ports::{CompletionRequest, CompletionTransport, InboundRequest};
use crate::queue::{AdmissionQueue, QueueError};
use crate::retry::RetryOrchestrator;

const CONNECTION_TEST_PROMPT: &str = "Hello";

/// A successful completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Transport calls it took, retries included.
    pub attempts: usize,
}

/// `{ success, value?, error? }` view of a call, ready to be serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse<T = String> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> From<Result<T, ApiError>> for CallResponse<T> {
    fn from(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(value) => Self {
                success: true,
                value: Some(value),
                error: None,
            },
            Err(error) => Self {
                success: false,
                value: None,
                error: Some(error),
            },
        }
    }
}

/// Instruction, blank line, text; then `Context:` and the context when one
/// is given.
pub fn build_prompt(instruction: &str, primary_text: &str, context: Option<&str>) -> String {
    let mut prompt = format!("{instruction}\n\n{primary_text}");
    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\n\nContext:\n");
        prompt.push_str(context);
    }
    prompt
}

pub struct ExternalServiceClient<T> {
    transport: T,
    config: ClientConfig,
    queue: AdmissionQueue,
    retry: RetryOrchestrator,
    classifier: ErrorClassifier,
}

impl<T: CompletionTransport> ExternalServiceClient<T> {
    pub fn new(transport: T, config: &SluiceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            transport,
            config: config.client.clone(),
            queue: AdmissionQueue::new(config.queue.clone())?,
            retry: RetryOrchestrator::new(config.retry.clone())?,
            classifier: ErrorClassifier::default(),
        })
    }

    /// Share an existing queue (e.g. one queue in front of several clients).
    pub fn with_queue(mut self, queue: AdmissionQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_retry(mut self, retry: RetryOrchestrator) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn is_healthy(&self) -> bool {
        self.queue.is_healthy()
    }

    /// Ask the service to apply `instruction` to `primary_text`.
    pub async fn call(
        &self,
        instruction: &str,
        primary_text: &str,
        context: Option<&str>,
    ) -> Result<Completion, ApiError> {
        let error_context = self.classifier.empty_context();
        self.dispatch(instruction, primary_text, context, error_context).await
    }

    /// Same as [`Self::call`], with failures reported against `request`.
    pub async fn call_for(
        &self,
        request: &impl InboundRequest,
        instruction: &str,
        primary_text: &str,
        context: Option<&str>,
    ) -> Result<Completion, ApiError> {
        let error_context = self.classifier.build_context(request);
        self.dispatch(instruction, primary_text, context, error_context).await
    }

    async fn dispatch(
        &self,
        instruction: &str,
        primary_text: &str,
        context: Option<&str>,
        error_context: ErrorContext,
    ) -> Result<Completion, ApiError> {
        if instruction.trim().is_empty() {
            return Err(self.reject(
                ErrorCode::InvalidPrompt,
                "Instruction is empty",
                error_context,
            ));
        }
        if primary_text.trim().is_empty() {
            return Err(self.reject(
                ErrorCode::InvalidText,
                "Text to process is empty",
                error_context,
            ));
        }

        let request = CompletionRequest {
            model: self.config.model.clone(),
            prompt: build_prompt(instruction, primary_text, context),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let label = match &error_context.request_id {
            Some(id) => format!("completion {id}"),
            None => "completion".to_string(),
        };

        let request = &request;
        let label_ref = label.as_str();
        let outcome = self
            .queue
            .enqueue(label_ref, move || async move {
                let result = self
                    .retry
                    .execute(label_ref, move || self.attempt(request))
                    .await;
                let attempts = result.attempts.len();
                result.into_result().map(|text| Completion { text, attempts })
            })
            .await;

        outcome.map_err(|err| self.fail(err, error_context))
    }

    /// One transport call. Non-2xx statuses and blank text become faults so
    /// the retry loop can judge them.
    async fn attempt(&self, request: &CompletionRequest) -> Result<String, Fault> {
        let response = self.transport.complete(request).await?;
        if !response.is_success() {
            return Err(Fault::status(response.status));
        }
        match response.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(Fault::named("EmptyResponse", "Empty response from text service")),
        }
    }

    fn reject(&self, code: ErrorCode, message: &str, context: ErrorContext) -> ApiError {
        self.classifier.report(code, message, None, context).1
    }

    fn fail(&self, err: QueueError<Fault>, context: ErrorContext) -> ApiError {
        // raw fault text goes to the log only; the caller gets the taxonomy message
        let api = ApiError::from_queue_error(&err);
        self.classifier.report(api.code, err.to_string(), err.operation_error(), context);
        api
    }

    /// Minimal direct request, bypassing queue and retry.
    pub async fn test_connection(&self) -> bool {
        let request = CompletionRequest {
            model: self.config.model.clone(),
            prompt: CONNECTION_TEST_PROMPT.to_string(),
            max_tokens: 5,
            temperature: 0.0,
        };
        let limit = self.queue.config().request_timeout;

        match tokio::time::timeout(limit, self.attempt(&request)).await {
            Ok(Ok(_)) => {
                info!(model = %self.config.model, "connection test succeeded");
                true
            }
            Ok(Err(fault)) => {
                error!(
                    code = %ErrorClassifier::classify(&fault),
                    original = %ErrorClassifier::sanitize_fault(&fault),
                    "connection test failed"
                );
                false
            }
            Err(_elapsed) => {
                error!(
                    timeout_ms = limit.as_millis() as u64,
                    "connection test timed out"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailureReason, Severity};
    use crate::impls::{RequestParts, ScriptedTransport};
    use crate::ports::TransportResponse;
    use std::sync::Arc;
    use std::time::Duration;

    fn config(max_concurrent: usize, max_queue_size: usize, max_retries: u32) -> SluiceConfig {
        let mut config = SluiceConfig::default();
        config.queue.max_concurrent = max_concurrent;
        config.queue.max_queue_size = max_queue_size;
        config.retry.max_retries = max_retries;
        config.retry.base_delay = Duration::from_millis(10);
        config.retry.jitter_factor = 0.0;
        config
    }

    fn client(
        transport: ScriptedTransport,
        config: &SluiceConfig,
    ) -> ExternalServiceClient<ScriptedTransport> {
        ExternalServiceClient::new(transport, config).unwrap()
    }

    #[test]
    fn prompt_layout() {
        assert_eq!(
            build_prompt("Fix grammar", "me go home", None),
            "Fix grammar\n\nme go home"
        );
        assert_eq!(
            build_prompt("Fix grammar", "me go home", Some("casual tone")),
            "Fix grammar\n\nme go home\n\nContext:\ncasual tone"
        );
        assert_eq!(
            build_prompt("Fix grammar", "me go home", Some("  ")),
            "Fix grammar\n\nme go home"
        );
    }

    #[tokio::test]
    async fn success_returns_trimmed_text() {
        let client = client(ScriptedTransport::always_ok("  I am going home.\n"), &config(2, 2, 3));

        let completion = client
            .call("Fix grammar", "me go home", Some("casual"))
            .await
            .unwrap();

        assert_eq!(completion.text, "I am going home.");
        assert_eq!(completion.attempts, 1);

        let sent = client.transport().requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].model, "gpt-4o-mini");
        assert_eq!(sent[0].max_tokens, 1000);
        assert_eq!(sent[0].prompt, "Fix grammar\n\nme go home\n\nContext:\ncasual");
        assert_eq!(client.stats().total_processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_then_ok_is_retried() {
        let transport = ScriptedTransport::new(
            [Ok(TransportResponse::with_status(503))],
            Ok(TransportResponse::ok("fixed")),
        );
        let client = client(transport, &config(2, 2, 3));

        let completion = client.call("Fix", "txt", None).await.unwrap();
        assert_eq!(completion.text, "fixed");
        assert_eq!(completion.attempts, 2);
        assert_eq!(client.transport().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_refused_becomes_api_unavailable() {
        let client = client(
            ScriptedTransport::always_failing(Fault::code("ECONNREFUSED")),
            &config(2, 2, 2),
        );

        let err = client.call("Fix", "txt", None).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::ApiUnavailable);
        assert_eq!(err.status, 503);
        assert_eq!(err.severity, Severity::High);
        assert_eq!(err.reason, None);
        assert!(!err.message.contains("ECONNREFUSED"));
        assert_eq!(client.transport().calls(), 3);

        let response = CallResponse::<String>::from(Err(err.clone()));
        assert!(!response.success);
        assert_eq!(response.error, Some(err));
    }

    #[tokio::test]
    async fn empty_text_is_a_failure() {
        let transport = ScriptedTransport::new([], Ok(TransportResponse::ok("   ")));
        let client = client(transport, &config(1, 1, 3));

        let err = client.call("Fix", "txt", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert_eq!(client.transport().calls(), 1);
    }

    #[tokio::test]
    async fn missing_text_field_is_a_failure() {
        let transport = ScriptedTransport::new([], Ok(TransportResponse::with_status(200)));
        let client = client(transport, &config(1, 1, 0));
        assert!(client.call("Fix", "txt", None).await.is_err());
    }

    #[tokio::test]
    async fn blank_input_is_rejected_before_the_queue() {
        let client = client(ScriptedTransport::always_ok("x"), &config(1, 1, 0));

        let err = client.call("Fix", "   ", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidText);
        assert_eq!(err.message, "Text to process is empty");

        let err = client.call("", "txt", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPrompt);

        assert_eq!(client.transport().calls(), 0);
        assert_eq!(client.stats().total_processed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_queue_reports_rate_limited() {
        let transport = ScriptedTransport::always_ok("slow").with_delay(Duration::from_secs(1));
        let client = Arc::new(client(transport, &config(1, 0, 0)));

        let busy = {
            let client = client.clone();
            tokio::spawn(async move { client.call("Fix", "first", None).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let err = client.call("Fix", "second", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimited);
        assert_eq!(err.reason, Some(FailureReason::QueueFull));

        assert!(busy.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_reports_timeout() {
        let transport = ScriptedTransport::always_ok("late").with_delay(Duration::from_secs(5));
        let mut cfg = config(1, 1, 0);
        cfg.queue.request_timeout = Duration::from_millis(100);
        cfg.retry.timeout = None;
        let client = client(transport, &cfg);

        let err = client.call("Fix", "txt", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(err.reason, Some(FailureReason::RequestTimeout));
        assert_eq!(client.stats().total_errors, 1);
    }

    #[tokio::test]
    async fn call_for_uses_request_metadata() {
        let client = client(
            ScriptedTransport::always_failing(Fault::status(400)),
            &config(1, 1, 3),
        );
        let request = RequestParts::new()
            .header("x-request-id", "req-42")
            .path("/api/rewrite");

        let err = client
            .call_for(&request, "Fix", "txt", None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPrompt);
        assert_eq!(err.severity, Severity::Low);
        assert_eq!(client.transport().calls(), 1);
    }

    #[tokio::test]
    async fn provider_rejection_text_stays_out_of_the_reply() {
        let fault = Fault::new("Invalid key sk-live-123 for org acme-internal").with_status(400);
        let client = client(ScriptedTransport::always_failing(fault), &config(1, 1, 3));

        let err = client.call("Fix", "txt", None).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidPrompt);
        assert_eq!(err, ErrorClassifier::to_api_error(ErrorCode::InvalidPrompt));
        assert!(!err.message.contains("sk-live-123"));
        assert!(!err.message.contains("acme-internal"));
    }

    #[tokio::test]
    async fn connection_test_reports_reachability() {
        let ok = client(ScriptedTransport::always_ok("hi"), &config(1, 1, 0));
        assert!(ok.test_connection().await);
        assert_eq!(ok.transport().requests()[0].prompt, CONNECTION_TEST_PROMPT);
        assert_eq!(ok.stats().total_processed, 0);

        let down = client(
            ScriptedTransport::always_failing(Fault::code("ENOTFOUND")),
            &config(1, 1, 3),
        );
        assert!(!down.test_connection().await);
        assert_eq!(down.transport().calls(), 1);
    }

    #[test]
    fn call_response_shape() {
        let ok: CallResponse = Ok::<_, ApiError>("done".to_string()).into();
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v, serde_json::json!({ "success": true, "value": "done" }));

        let failed: CallResponse =
            Err(ErrorClassifier::to_api_error(ErrorCode::Timeout)).into();
        let v = serde_json::to_value(&failed).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "TIMEOUT");
        assert!(v.get("value").is_none());
    }
}

//! Email summarization with a deterministic local fallback.
//!
//! One remote attempt bounded by a timeout. Every failure mode degrades to
//! a truncation of the body, so `summarize` never errors.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::model::SummarySource;

/// Appended whenever text is cut.
pub const TRUNCATION_MARKER: &str = "...";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes emails concisely. \
Focus on key points and actions needed.";

const EMPTY_BODY_SUMMARY: &str = "(no readable content)";

/// Tuning knobs for the summarizer.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Hard limit on the remote call.
    pub timeout: Duration,
    /// Body budget for the fallback summary.
    pub fallback_chars: usize,
    /// Cap applied to every summary regardless of source.
    pub max_summary_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            fallback_chars: 1000,
            max_summary_chars: 1500,
            max_tokens: 300,
            temperature: 0.3,
        }
    }
}

/// A summary and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub text: String,
    pub source: SummarySource,
}

/// Summarizes inbound mail through an optional remote provider.
pub struct Summarizer {
    provider: Option<Arc<dyn LlmProvider>>,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, config: SummarizerConfig) -> Self {
        Self { provider, config }
    }

    /// Summarizer that never calls out.
    pub fn fallback_only(config: SummarizerConfig) -> Self {
        Self::new(None, config)
    }

    /// Produce a summary. Total: falls back on any remote failure.
    pub async fn summarize(&self, subject: &str, body: &str) -> Summary {
        let summary = match (&self.provider, body.trim().is_empty()) {
            (Some(provider), false) => match self.remote(provider.as_ref(), subject, body).await {
                Ok(text) => {
                    debug!(model = provider.model_name(), "Remote summary produced");
                    Summary {
                        text,
                        source: SummarySource::Remote,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Remote summary failed, using fallback");
                    self.fallback(body)
                }
            },
            _ => self.fallback(body),
        };

        Summary {
            text: truncate_chars(&summary.text, self.config.max_summary_chars),
            source: summary.source,
        }
    }

    async fn remote(
        &self,
        provider: &dyn LlmProvider,
        subject: &str,
        body: &str,
    ) -> Result<String, LlmError> {
        let prompt = format!(
            "Please summarize this email in 2-3 concise sentences.\n\nSubject: {subject}\n\n{body}"
        );
        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .with_max_tokens(self.config.max_tokens)
        .with_temperature(self.config.temperature);

        let response = tokio::time::timeout(self.config.timeout, provider.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: provider.model_name().to_string(),
                timeout: self.config.timeout,
            })??;
        debug!(
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Summary completion usage"
        );

        Ok(response.content.trim().to_string())
    }

    /// Deterministic local summary.
    fn fallback(&self, body: &str) -> Summary {
        let body = body.trim();
        let text = if body.is_empty() {
            EMPTY_BODY_SUMMARY.to_string()
        } else {
            truncate_chars(body, self.config.fallback_chars)
        };
        Summary {
            text,
            source: SummarySource::Fallback,
        }
    }
}

/// Cut `text` to `max_chars` characters and append the marker. Text that
/// already fits is returned unchanged.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionResponse;

    /// Mock LLM with a scripted reply and optional delay.
    struct StubLlm {
        reply: Result<String, String>,
        delay: Duration,
    }

    impl StubLlm {
        fn ok(text: &str) -> Arc<dyn LlmProvider> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                delay: Duration::ZERO,
            })
        }

        fn failing() -> Arc<dyn LlmProvider> {
            Arc::new(Self {
                reply: Err("HTTP 500".to_string()),
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<dyn LlmProvider> {
            Arc::new(Self {
                reply: Ok("too late".to_string()),
                delay,
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                Ok(text) => Ok(CompletionResponse {
                    content: text.clone(),
                    input_tokens: 10,
                    output_tokens: 5,
                }),
                Err(reason) => Err(LlmError::RequestFailed {
                    provider: "stub".to_string(),
                    reason: reason.clone(),
                }),
            }
        }
    }

    fn config() -> SummarizerConfig {
        SummarizerConfig {
            timeout: Duration::from_millis(50),
            fallback_chars: 20,
            max_summary_chars: 40,
            ..SummarizerConfig::default()
        }
    }

    #[tokio::test]
    async fn remote_summary_is_used() {
        let s = Summarizer::new(Some(StubLlm::ok("  Pay the invoice.  ")), config());
        let summary = s.summarize("Invoice", "Please pay by Friday.").await;
        assert_eq!(summary.source, SummarySource::Remote);
        assert_eq!(summary.text, "Pay the invoice.");
    }

    #[tokio::test]
    async fn provider_error_falls_back() {
        let s = Summarizer::new(Some(StubLlm::failing()), config());
        let summary = s.summarize("Hi", "short body").await;
        assert_eq!(summary.source, SummarySource::Fallback);
        assert_eq!(summary.text, "short body");
    }

    #[tokio::test]
    async fn timeout_falls_back_to_truncated_body() {
        let body = "A very long description exceeding the fallback budget...";
        let s = Summarizer::new(Some(StubLlm::slow(Duration::from_secs(2))), config());

        let started = std::time::Instant::now();
        let summary = s.summarize("Long", body).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(summary.source, SummarySource::Fallback);
        assert_eq!(summary.text, format!("{}{}", &body[..20], TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn no_provider_means_fallback() {
        let s = Summarizer::fallback_only(config());
        let summary = s.summarize("Hi", "hello there").await;
        assert_eq!(summary.source, SummarySource::Fallback);
        assert_eq!(summary.text, "hello there");
    }

    #[tokio::test]
    async fn blank_body_skips_remote() {
        // The stub would answer, but a blank body never reaches it.
        let s = Summarizer::new(Some(StubLlm::ok("invented")), config());
        let summary = s.summarize("Hi", "  \n ").await;
        assert_eq!(summary.source, SummarySource::Fallback);
        assert_eq!(summary.text, EMPTY_BODY_SUMMARY);
    }

    #[tokio::test]
    async fn empty_remote_text_stays_remote() {
        let s = Summarizer::new(Some(StubLlm::ok("   ")), config());
        let summary = s.summarize("Hi", "body").await;
        assert_eq!(summary.source, SummarySource::Remote);
        assert_eq!(summary.text, "");
    }

    #[tokio::test]
    async fn long_remote_output_is_capped() {
        let long = "x".repeat(100);
        let s = Summarizer::new(Some(StubLlm::ok(&long)), config());
        let summary = s.summarize("Hi", "body").await;
        assert_eq!(summary.source, SummarySource::Remote);
        assert_eq!(summary.text, format!("{}{}", "x".repeat(40), TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn fallback_is_non_empty_for_non_empty_body() {
        let s = Summarizer::new(Some(StubLlm::failing()), config());
        for body in ["a", "é", "line one\nline two", &"long ".repeat(500)] {
            let summary = s.summarize("", body).await;
            assert_eq!(summary.source, SummarySource::Fallback);
            assert!(!summary.text.is_empty(), "empty fallback for {body:?}");
        }
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exact", 5), "exact");
    }
}

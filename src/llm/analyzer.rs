//! Per-file issue analysis with rate-limit aware retries
//!
//! One file costs at most `max_attempts` calls. A rate-limit signal waits
//! (longer when it mentions quota) and retries; a rate limit that also talks
//! about billing or plan limits on a retry is a hard account limit and stops
//! immediately. Other failures retry at once and are fatal on the final
//! attempt. A response that is not valid JSON is never retried: the file
//! simply yields no issues.

use super::client::{AiServiceError, CompletionService};
use super::parse::{parse_issues, parse_secrets, parse_verdict, SecretFinding};
use super::prompts;
use crate::config::RetrySettings;
use crate::models::{LogLevel, NewIssue};
use crate::util::truncate;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Rate limited with billing/plan-limit language after a retry
    #[error("AI quota exceeded (hard billing/plan limit): {0}")]
    BillingLimit(#[source] AiServiceError),

    /// Still rate limited on the final attempt
    #[error("rate limited on all {attempts} attempts: {source}")]
    RateLimitExhausted {
        attempts: u32,
        #[source]
        source: AiServiceError,
    },

    #[error("analysis failed after {attempts} attempt(s): {source}")]
    Fatal {
        attempts: u32,
        #[source]
        source: AiServiceError,
    },
}

/// Receives analyzer narration worth surfacing in an audit's log trail
pub type LogSink<'a> = Box<dyn Fn(LogLevel, &str) + Send + Sync + 'a>;

pub struct IssueAnalyzer<'a> {
    service: &'a dyn CompletionService,
    retry: RetrySettings,
    sink: Option<LogSink<'a>>,
}

impl<'a> IssueAnalyzer<'a> {
    pub fn new(service: &'a dyn CompletionService, retry: RetrySettings) -> Self {
        Self {
            service,
            retry,
            sink: None,
        }
    }

    /// Mirror retry and escalation messages into `sink`
    pub fn with_log_sink(mut self, sink: impl Fn(LogLevel, &str) + Send + Sync + 'a) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    fn report(&self, level: LogLevel, message: &str) {
        if let Some(sink) = &self.sink {
            sink(level, message);
        }
    }

    /// Wait before retrying after a rate-limit signal
    fn backoff_for(&self, err: &AiServiceError) -> Duration {
        if err.signal_text().contains("quota") {
            self.retry.quota_backoff()
        } else {
            self.retry.rate_limit_backoff()
        }
    }

    /// Find issues in one file. `file_path` is relative to the repository root.
    pub async fn analyze_file(
        &self,
        file_path: &str,
        content: &str,
        language: &str,
    ) -> Result<Vec<NewIssue>, AnalysisError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let user = prompts::issue_analysis_user(file_path, language, content);

        for attempt in 0..max_attempts {
            let is_last = attempt + 1 == max_attempts;

            let err = match self
                .service
                .complete(prompts::ISSUE_ANALYSIS_SYSTEM, &user)
                .await
            {
                Ok(text) => {
                    return Ok(match parse_issues(&text, file_path) {
                        Ok(issues) => {
                            tracing::info!("Analyzed {}: Found {} issues", file_path, issues.len());
                            issues
                        }
                        Err(e) => {
                            tracing::error!(
                                file = file_path,
                                "Failed to parse AI response: {} (response: {})",
                                e,
                                truncate(&text, 500)
                            );
                            Vec::new()
                        }
                    });
                }
                Err(err) => err,
            };

            if err == AiServiceError::MissingApiKey {
                return Err(AnalysisError::Fatal {
                    attempts: attempt + 1,
                    source: err,
                });
            }

            if err.is_rate_limit() {
                tracing::warn!(
                    file = file_path,
                    attempt = attempt + 1,
                    "Rate limit/quota hit (429)"
                );
                let signal = err.signal_text();

                if attempt > 0 && (signal.contains("billing") || signal.contains("plan")) {
                    let message = format!("AI quota exceeded (hard billing/plan limit): {}", err);
                    tracing::error!("{}", message);
                    self.report(LogLevel::Error, &message);
                    return Err(AnalysisError::BillingLimit(err));
                }

                if !is_last {
                    let wait = self.backoff_for(&err);
                    let message = format!(
                        "Rate limited while analyzing {}. Retrying in {}s (attempt {}/{})",
                        file_path,
                        wait.as_secs(),
                        attempt + 1,
                        max_attempts
                    );
                    tracing::warn!("{}", message);
                    self.report(LogLevel::Warning, &message);
                    tokio::time::sleep(wait).await;
                    continue;
                }

                tracing::error!("Error analyzing {}: {}", file_path, err);
                return Err(AnalysisError::RateLimitExhausted {
                    attempts: max_attempts,
                    source: err,
                });
            }

            tracing::error!(attempt = attempt + 1, "Error analyzing {}: {}", file_path, err);
            if is_last {
                return Err(AnalysisError::Fatal {
                    attempts: max_attempts,
                    source: err,
                });
            }
        }

        Ok(Vec::new())
    }

    /// Look for committed credentials. Single attempt; any failure is no findings.
    pub async fn scan_secrets(&self, file_path: &str, content: &str) -> Vec<SecretFinding> {
        let user = prompts::secret_scan_user(content);
        let text = match self.service.complete(prompts::SECRET_SCAN_SYSTEM, &user).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(file = file_path, "Error scanning for secrets: {}", e);
                return Vec::new();
            }
        };
        match parse_secrets(&text) {
            Ok(findings) => findings,
            Err(e) => {
                tracing::error!(file = file_path, "Error scanning for secrets: {}", e);
                Vec::new()
            }
        }
    }

    /// Ask whether `fixed` is a sound replacement for `original`.
    /// Anything other than an explicit yes counts as invalid.
    pub async fn validate_fix(&self, original: &str, fixed: &str, language: &str) -> bool {
        let user = prompts::validate_fix_user(original, fixed, language);
        match self.service.complete(prompts::VALIDATE_FIX_SYSTEM, &user).await {
            Ok(text) => parse_verdict(&text).unwrap_or(false),
            Err(e) => {
                tracing::debug!("Fix validation failed: {}", e);
                false
            }
        }
    }
}

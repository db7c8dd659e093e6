//! GitHub REST API integration
//!
//! Pull request creation and forking for the publisher, plus owner/name
//! parsing for submitted repository URLs.

use crate::util::truncate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://api.github.com";
const API_TIMEOUT_SECS: u64 = 60;

/// Maximum length for error body content in error messages
const MAX_ERROR_BODY_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Not authenticated with GitHub. Set GITHUB_TOKEN.")]
    MissingToken,

    #[error("GitHub API error: {0}")]
    Api(String),

    #[error("GitHub request failed: {0}")]
    Transport(String),
}

/// An opened pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub url: String,
    pub number: u64,
}

/// Pull-request operations of a code hosting service, keyed by `owner/repo`
#[async_trait]
pub trait PullRequestHost: Send + Sync {
    async fn create_pull_request(
        &self,
        full_name: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, HostError>;

    /// Fork into the authenticated account, returning the fork's full name
    async fn fork_repository(&self, full_name: &str) -> Result<String, HostError>;
}

// ============================================================================
// URL parsing
// ============================================================================

/// Extract owner and repo from a GitHub URL.
///
/// Supports:
/// - git@github.com:owner/repo.git
/// - https://github.com/owner/repo(.git)
/// - github.com/owner/repo
///
/// Extra path segments (`/tree/main`, ...) are ignored.
pub fn parse_github_url(url: &str) -> Option<(String, String)> {
    let url = url.trim();

    let path = if let Some(rest) = url.strip_prefix("git@github.com:") {
        rest.to_string()
    } else if let Ok(parsed) = url::Url::parse(url) {
        match parsed.host_str() {
            Some("github.com") | Some("www.github.com") => parsed.path().to_string(),
            _ => return None,
        }
    } else {
        // No scheme: github.com/owner/repo
        let rest = url
            .strip_prefix("www.")
            .unwrap_or(url)
            .strip_prefix("github.com/")?;
        rest.to_string()
    };

    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?.trim_end_matches(".git");
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

// ============================================================================
// API client
// ============================================================================

/// Sanitize an API error body to prevent credential leakage.
/// Truncates long responses and redacts potential secrets.
fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "token",
        "secret",
        "password",
        "credential",
        "bearer",
        "ghp_",        // personal access token prefix
        "gho_",        // OAuth token prefix
        "ghs_",        // app installation token prefix
        "github_pat_", // fine-grained PAT prefix
    ];

    let lower = body.to_lowercase();
    if SECRET_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return "(error details redacted - may contain sensitive data)".to_string();
    }

    if body.chars().count() > MAX_ERROR_BODY_LEN {
        format!("{} (truncated)", truncate(body, MAX_ERROR_BODY_LEN))
    } else {
        body.to_string()
    }
}

#[derive(Serialize)]
struct CreatePrRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Deserialize)]
struct CreatePrResponse {
    html_url: String,
    number: u64,
}

#[derive(Deserialize)]
struct ForkResponse {
    full_name: String,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// Readable message for a failed API call
fn api_error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(body) {
        let detail = api_error
            .errors
            .first()
            .and_then(|e| e.message.clone())
            .unwrap_or_default();
        return if detail.is_empty() {
            api_error.message
        } else {
            format!("{}: {}", api_error.message, detail)
        };
    }
    format!("({}) {}", status, sanitize_error_body(body))
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    token: Option<String>,
    api_base: String,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self, HostError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .map_err(|e| HostError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            token: token.filter(|t| !t.trim().is_empty()),
            api_base: API_BASE.to_string(),
        })
    }

    fn token(&self) -> Result<&str, HostError> {
        self.token.as_deref().ok_or(HostError::MissingToken)
    }

    async fn post<T, R>(&self, path: &str, payload: &T) -> Result<R, HostError>
    where
        T: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let token = self.token()?;
        let resp = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", "patchpilot")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .json(payload)
            .send()
            .await
            .map_err(|e| HostError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            resp.json::<R>()
                .await
                .map_err(|e| {
                    HostError::Transport(format!("Failed to parse GitHub response: {}", e))
                })
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(HostError::Api(api_error_message(status, &body)))
        }
    }
}

#[async_trait]
impl PullRequestHost for GitHubClient {
    async fn create_pull_request(
        &self,
        full_name: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, HostError> {
        let request = CreatePrRequest {
            title,
            body,
            head,
            base,
        };
        let pr: CreatePrResponse = self
            .post(&format!("/repos/{}/pulls", full_name), &request)
            .await?;
        tracing::info!("Created PR #{} for {}", pr.number, full_name);
        Ok(PullRequest {
            url: pr.html_url,
            number: pr.number,
        })
    }

    async fn fork_repository(&self, full_name: &str) -> Result<String, HostError> {
        let fork: ForkResponse = self
            .post(&format!("/repos/{}/forks", full_name), &serde_json::json!({}))
            .await?;
        tracing::info!("Forked {} to {}", full_name, fork.full_name);
        Ok(fork.full_name)
    }
}

// ============================================================================
// Tests
// ============================================================================

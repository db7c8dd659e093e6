use crate::models::{IssueType, NewIssue, Severity};
use serde::Deserialize;
use serde_json::Value;

/// Pull the JSON payload out of a response that may be wrapped in a markdown
/// fence. Prefers a ```` ```json ```` block, then the first plain fenced block.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();
    if let Some((_, after)) = text.split_once("```json") {
        return after.split("```").next().unwrap_or(after).trim();
    }
    if let Some((_, after)) = text.split_once("```") {
        return after.split("```").next().unwrap_or(after).trim();
    }
    text
}

/// Raw issue record as the model writes it. Everything is optional.
#[derive(Debug, Deserialize)]
struct IssueJson {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    line_number: Option<Value>,
    #[serde(default)]
    issue_type: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    original_code: Option<String>,
    #[serde(default)]
    fixed_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssuesEnvelope {
    #[serde(default)]
    issues: Vec<IssueJson>,
}

/// Line numbers arrive as numbers, numeric strings or null
fn lenient_line(value: Option<Value>) -> Option<u32> {
    let line = match value? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    line.filter(|line| *line > 0)
}

/// Parse an issue-analysis response. `file_path` fills in records that omit
/// their own path. Fails only when the payload is not a JSON object of the
/// expected shape.
pub fn parse_issues(response: &str, file_path: &str) -> Result<Vec<NewIssue>, serde_json::Error> {
    let envelope: IssuesEnvelope = serde_json::from_str(extract_json(response))?;

    Ok(envelope
        .issues
        .into_iter()
        .map(|raw| {
            let fixed_code = raw.fixed_code.filter(|code| !code.is_empty());
            NewIssue {
                file_path: raw
                    .file_path
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or_else(|| file_path.to_string()),
                line_number: lenient_line(raw.line_number),
                issue_type: raw
                    .issue_type
                    .as_deref()
                    .map(IssueType::parse_lenient)
                    .unwrap_or(IssueType::CodeSmell),
                severity: raw
                    .severity
                    .as_deref()
                    .map(Severity::parse_lenient)
                    .unwrap_or(Severity::Medium),
                description: raw.description.unwrap_or_default(),
                explanation: raw.explanation.unwrap_or_default(),
                original_code: raw.original_code,
                is_fixed: fixed_code.is_some(),
                fixed_code,
            }
        })
        .collect())
}

const SECRET_EXPLANATION: &str = "Credentials committed to source control can be harvested by \
     anyone with read access. Rotate the secret and load it from the environment.";

/// One credential found by the secret scan
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SecretFinding {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub severity: Option<String>,
}

impl SecretFinding {
    /// Record as a `secret_exposure` issue with no fix
    pub fn into_issue(self, file_path: &str) -> NewIssue {
        let description = if self.kind.is_empty() {
            self.description.clone()
        } else if self.description.is_empty() {
            format!("Exposed {}", self.kind)
        } else {
            format!("{}: {}", self.kind, self.description)
        };
        NewIssue {
            file_path: file_path.to_string(),
            line_number: self.line.filter(|line| *line > 0),
            issue_type: IssueType::SecretExposure,
            severity: self
                .severity
                .as_deref()
                .map(Severity::parse_lenient)
                .unwrap_or(Severity::Critical),
            description,
            explanation: SECRET_EXPLANATION.to_string(),
            original_code: None,
            fixed_code: None,
            is_fixed: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SecretsEnvelope {
    #[serde(default)]
    secrets: Vec<SecretFinding>,
}

pub fn parse_secrets(response: &str) -> Result<Vec<SecretFinding>, serde_json::Error> {
    let envelope: SecretsEnvelope = serde_json::from_str(extract_json(response))?;
    Ok(envelope.secrets)
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    valid: bool,
}

/// `{"valid": true}` -> true; anything unparseable is an error
pub fn parse_verdict(response: &str) -> Result<bool, serde_json::Error> {
    let verdict: Verdict = serde_json::from_str(extract_json(response))?;
    Ok(verdict.valid)
}

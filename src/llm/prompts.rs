pub const ISSUE_ANALYSIS_SYSTEM: &str =
    r#"You are a senior software engineer reviewing one source file for defects.

Analyze the code for:
- Syntax errors
- Logic errors and race conditions
- Security vulnerabilities (SQL injection, XSS, exposed secrets)
- Code smells and anti-patterns
- Performance issues

For each issue found:
- Give a clear, concise description
- Give the exact line number when there is one
- Categorize the issue type and severity
- Explain why it is a problem
- Provide the corrected code

RULES FOR FIXES:
- original_code must be EXACT text from the file (copy-paste precision, same indentation)
- fixed_code replaces original_code verbatim; keep the original style and formatting
- Do not remove comments unless necessary
- Omit fixed_code when you cannot give a complete, working replacement

OUTPUT FORMAT (JSON only):
{
  "issues": [
    {
      "file_path": "path/to/file.js",
      "line_number": 42,
      "issue_type": "security_vulnerability",
      "severity": "high",
      "description": "SQL injection vulnerability",
      "explanation": "User input is concatenated into the SQL query without sanitization",
      "original_code": "db.query(\"SELECT * FROM users WHERE id = \" + userId)",
      "fixed_code": "db.query(\"SELECT * FROM users WHERE id = $1\", [userId])"
    }
  ]
}

Issue types: syntax_error, logic_error, security_vulnerability, code_smell,
performance_issue, secret_exposure
Severity levels: low, medium, high, critical
If no issues are found, return {"issues": []}"#;

pub const SECRET_SCAN_SYSTEM: &str =
    r#"You are a security expert. Scan the code for exposed secrets and credentials.

Look for:
- API keys (AWS, Google, Azure, OpenAI, etc.)
- Database passwords
- Private keys
- OAuth tokens
- Hardcoded credentials

OUTPUT FORMAT (JSON only):
{
  "secrets": [
    {
      "type": "api_key",
      "description": "AWS API key exposed",
      "line": 15,
      "severity": "critical"
    }
  ]
}

If no secrets are found, return {"secrets": []}"#;

pub const VALIDATE_FIX_SYSTEM: &str = r#"You check proposed code fixes.
Decide whether the fixed code is syntactically correct and keeps the original code's
intended functionality.
Respond with ONLY {"valid": true} or {"valid": false}"#;

pub fn issue_analysis_user(file_path: &str, language: &str, content: &str) -> String {
    format!(
        "File to analyze: {}\nLanguage: {}\nCode:\n```{}\n{}\n```\n\n\
         Return ONLY a valid JSON object with the detected issues.",
        file_path, language, language, content
    )
}

pub fn secret_scan_user(content: &str) -> String {
    format!("Code:\n```\n{}\n```", content)
}

pub fn validate_fix_user(original: &str, fixed: &str, language: &str) -> String {
    format!(
        "Original code ({lang}):\n```{lang}\n{original}\n```\n\n\
         Fixed code ({lang}):\n```{lang}\n{fixed}\n```",
        lang = language,
        original = original,
        fixed = fixed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_prompt_names_every_issue_type() {
        for issue_type in crate::models::IssueType::ALL {
            assert!(
                ISSUE_ANALYSIS_SYSTEM.contains(issue_type.as_str()),
                "missing {}",
                issue_type.as_str()
            );
        }
    }

    #[test]
    fn test_user_prompt_embeds_file() {
        let prompt = issue_analysis_user("src/app.py", "python", "x = 1");
        assert!(prompt.contains("File to analyze: src/app.py"));
        assert!(prompt.contains("```python\nx = 1\n```"));
    }
}

pub mod analyzer;
pub mod client;
pub mod parse;
pub mod prompts;

pub use analyzer::{AnalysisError, IssueAnalyzer};
pub use client::{AiServiceError, CompletionService, OpenRouterClient};
pub use parse::SecretFinding;

//! patchpilot library crate
//!
//! Clones a GitHub repository, has a language model look for issues file by
//! file, applies the proposed fixes and opens a pull request. The binary is a
//! thin CLI over these modules; integration tests drive them with fakes.

pub mod audit;
pub mod config;
pub mod discover;
pub mod fetch;
pub mod fix;
pub mod git_ops;
pub mod github;
pub mod llm;
pub mod models;
pub mod publish;
pub mod store;
pub mod util;
pub mod worker;

//! GitHub authentication detection.
//!
//! Token lookup order:
//! 1. GITHUB_TOKEN env var
//! 2. GH_TOKEN env var
//! 3. `gh auth token` (gh CLI)
//!
//! Environment variables come first so CI runs never depend on a gh login.

use std::env;
use std::process::Command;

use crate::error::GitHubError;

const TOKEN_ENV_VARS: &[&str] = &["GITHUB_TOKEN", "GH_TOKEN"];

/// Get a GitHub token using the configured auth strategy.
pub fn get_github_token() -> Result<String, GitHubError> {
    token_from_env()
        .or_else(token_from_gh_cli)
        .ok_or(GitHubError::AuthenticationFailed)
}

/// First non-empty token from the supported environment variables.
fn token_from_env() -> Option<String> {
    TOKEN_ENV_VARS
        .iter()
        .filter_map(|var| env::var(var).ok())
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

/// Try to get a token from the gh CLI.
fn token_from_gh_cli() -> Option<String> {
    let output = Command::new("gh").args(["auth", "token"]).output().ok()?;
    if !output.status.success() {
        return None;
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!token.is_empty()).then_some(token)
}

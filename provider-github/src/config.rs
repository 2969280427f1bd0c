use crate::error::{GitHubError, Result};
use bridge_traits::RepoRef;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Connection settings for one repository branch.
#[derive(Clone)]
pub struct GitHubConfig {
    pub api_base: String,
    pub repo: RepoRef,
    pub token: String,
    /// Attempts per request, the first one included.
    pub max_attempts: u32,
    /// First backoff delay; doubled on every further attempt.
    pub retry_base_delay: Duration,
    pub request_timeout: Duration,
    /// Prepended to the generated commit message of every write.
    pub commit_message_prefix: String,
}

impl GitHubConfig {
    pub fn new(repo: RepoRef, token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            repo,
            token: token.into(),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            request_timeout: Duration::from_secs(30),
            commit_message_prefix: "photo-vault".to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_commit_message_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.commit_message_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(GitHubError::InvalidConfig("token cannot be empty".to_string()));
        }

        for (name, value) in [
            ("owner", &self.repo.owner),
            ("repo", &self.repo.repo),
            ("branch", &self.repo.branch),
        ] {
            if value.trim().is_empty() {
                return Err(GitHubError::InvalidConfig(format!("{} cannot be empty", name)));
            }
        }

        if self.max_attempts == 0 {
            return Err(GitHubError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if !self.api_base.starts_with("http") {
            return Err(GitHubError::InvalidConfig(format!(
                "api_base must be an http(s) URL, got {}",
                self.api_base
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_base", &self.api_base)
            .field("repo", &self.repo)
            .field("token", &"[REDACTED]")
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoRef {
        RepoRef::new("octo", "photos", "main")
    }

    #[test]
    fn test_defaults_validate() {
        let config = GitHubConfig::new(repo(), "gho_token");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        assert!(GitHubConfig::new(repo(), " ").validate().is_err());
        assert!(GitHubConfig::new(RepoRef::new("octo", "", "main"), "t")
            .validate()
            .is_err());
        assert!(GitHubConfig::new(repo(), "t")
            .with_retry(0, Duration::ZERO)
            .validate()
            .is_err());
        assert!(GitHubConfig::new(repo(), "t")
            .with_api_base("ftp://example.com")
            .validate()
            .is_err());
    }

    #[test]
    fn test_api_base_trailing_slash_is_trimmed() {
        let config = GitHubConfig::new(repo(), "t").with_api_base("https://ghe.example.com/api/v3/");
        assert_eq!(config.api_base, "https://ghe.example.com/api/v3");
    }

    #[test]
    fn test_debug_hides_token() {
        let rendered = format!("{:?}", GitHubConfig::new(repo(), "gho_secret"));
        assert!(!rendered.contains("gho_secret"));
    }
}

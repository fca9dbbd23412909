//! Configuration for the Gitee client.

use std::time::Duration;

use url::Url;
use watcher_core::PlatformSettings;

use crate::error::{Error, Result};

const TOKEN_ENV: &str = "GITEE_TOKEN";

/// Connection settings for [`crate::GiteeClient`].
#[derive(Clone)]
pub struct GiteeConfig {
    /// API root, e.g. `https://gitee.com/api/v5/`. Always ends with `/`.
    pub base_url: Url,
    /// Personal access token.
    pub token: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for GiteeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GiteeConfig")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GiteeConfig {
    /// Build a config for an API root and token.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL.
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base(base_url)?,
            token: token.into(),
            timeout: Duration::from_secs(30),
        })
    }

    /// Set the timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a config from the watcher settings.
    ///
    /// The token is read from `token_path` when set, otherwise from the
    /// `GITEE_TOKEN` environment variable.
    ///
    /// # Errors
    ///
    /// Returns a config error if no token can be found or the URL is invalid.
    pub fn from_settings(settings: &PlatformSettings) -> Result<Self> {
        let token = match &settings.token_path {
            Some(path) => std::fs::read_to_string(path)
                .map(|raw| raw.trim().to_string())
                .map_err(|e| {
                    Error::config_error(format!("read token file '{}': {e}", path.display()))
                })?,
            None => std::env::var(TOKEN_ENV).map_err(|_| {
                Error::config_error(format!("no token_path configured and {TOKEN_ENV} is unset"))
            })?,
        };

        if token.is_empty() {
            return Err(Error::config_error("access token is empty"));
        }

        Ok(Self::new(&settings.base_url, token)?.timeout(settings.timeout()))
    }
}

fn normalize_base(raw: &str) -> Result<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Ok(Url::parse(&with_slash)?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let cfg = GiteeConfig::new("https://gitee.com/api/v5", "t").unwrap();
        assert_eq!(cfg.base_url.as_str(), "https://gitee.com/api/v5/");
        assert_eq!(
            cfg.base_url.join("orgs/openeuler/repos").unwrap().as_str(),
            "https://gitee.com/api/v5/orgs/openeuler/repos"
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let cfg = GiteeConfig::new("https://gitee.com/api/v5", "secret-token").unwrap();
        assert!(!format!("{cfg:?}").contains("secret-token"));
    }

    #[test]
    fn test_token_file_is_trimmed() {
        let dir = std::env::temp_dir().join(format!("watcher-token-{}", std::process::id()));
        std::fs::write(&dir, "abc123\n").unwrap();
        let settings = PlatformSettings {
            token_path: Some(dir.clone()),
            ..PlatformSettings::default()
        };

        let cfg = GiteeConfig::from_settings(&settings).unwrap();
        assert_eq!(cfg.token, "abc123");
        std::fs::remove_file(dir).ok();
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(GiteeConfig::new("not a url", "t").is_err());
    }
}

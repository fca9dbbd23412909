//! Watcher configuration.
//!
//! Loaded from YAML (JSON documents parse as well) and validated once at
//! startup. Validation also compiles the descriptor template when the OBS
//! meta project switch is on, so a broken template stops the process before
//! the first cycle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::result::Result;
use crate::template::ProjectTemplate;

/// An org/repo/branch triple on the hosting platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoBranch {
    pub org: String,
    pub repo: String,
    pub branch: String,
}

impl RepoBranch {
    fn validate(&self, what: &str) -> Result<()> {
        if self.org.is_empty() || self.repo.is_empty() || self.branch.is_empty() {
            return Err(Error::config_invalid(format!(
                "{what}: org, repo and branch are all required"
            )));
        }
        Ok(())
    }
}

/// Where the governance files live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchingFiles {
    #[serde(flatten)]
    pub source: RepoBranch,

    /// Read governance files from this directory instead of the platform.
    #[serde(default)]
    pub local_root: Option<PathBuf>,

    /// Path to the repository file, e.g. `repository/openeuler.yaml`.
    pub repo_file_path: String,

    /// Path to the sig file, e.g. `sig/sigs.yaml`.
    pub sig_file_path: String,

    /// Directory holding one sub-directory (with an OWNERS file) per sig.
    pub sig_dir: String,
}

impl WatchingFiles {
    fn validate(&self) -> Result<()> {
        if self.local_root.is_none() {
            self.source.validate("watching_files")?;
        }
        for (field, value) in [
            ("repo_file_path", &self.repo_file_path),
            ("sig_file_path", &self.sig_file_path),
            ("sig_dir", &self.sig_dir),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config_invalid(format!(
                    "watching_files.{field} is required"
                )));
            }
        }
        Ok(())
    }
}

/// The OBS meta repository and the descriptor written for new projects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObsMetaProject {
    /// The branch the project file is written to.
    #[serde(rename = "obs_repo")]
    pub branch: RepoBranch,

    pub project_dir: String,

    pub project_file_name: String,

    pub project_template_path: PathBuf,
}

impl ObsMetaProject {
    /// Path of the descriptor for one project, relative to the obs repo root.
    #[must_use]
    pub fn project_file_path(&self, project: &str) -> String {
        [self.project_dir.as_str(), project, self.project_file_name.as_str()]
            .iter()
            .map(|part| part.trim_matches('/'))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn validate(&self) -> Result<ProjectTemplate> {
        self.branch.validate("obs_meta_project.obs_repo")?;
        if self.project_dir.is_empty() || self.project_file_name.is_empty() {
            return Err(Error::config_invalid(
                "obs_meta_project: project_dir and project_file_name are required",
            ));
        }
        ProjectTemplate::from_file(&self.project_template_path)
    }
}

/// Permission granted to repository members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Pull,
    #[default]
    Push,
    Admin,
}

impl Permission {
    /// The wire name used by the platform API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// File holding the access token. `GITEE_TOKEN` is used when unset.
    #[serde(default)]
    pub token_path: Option<PathBuf>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl PlatformSettings {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Default reviewers set on every repository the watcher creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewerConfig {
    pub assignees: Vec<String>,
    pub testers: Vec<String>,
    pub assignees_number: u32,
    pub testers_number: u32,
}

/// Top-level watcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub watching_files: WatchingFiles,

    /// Worker pool size.
    pub concurrent_size: usize,

    /// Pending-task capacity of the worker pool.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Minutes between cycle starts. 0, negative or unset means back to back.
    #[serde(default)]
    pub interval: i64,

    #[serde(default = "default_base_branch")]
    pub default_base_branch: String,

    #[serde(default)]
    pub default_permission: Permission,

    /// Logins that are never removed from a repository.
    #[serde(default)]
    pub member_exclusions: Vec<String>,

    #[serde(default)]
    pub reviewer: ReviewerConfig,

    #[serde(default)]
    pub enable_creating_obs_meta_project: bool,

    #[serde(default)]
    pub obs_meta_project: ObsMetaProject,

    #[serde(default)]
    pub platform: PlatformSettings,
}

/// A validated configuration plus the artifacts derived from it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: WatcherConfig,
    /// Present iff `enable_creating_obs_meta_project` is on.
    pub project_template: Option<ProjectTemplate>,
}

impl WatcherConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// [`WatcherConfig::validate`] rejects it.
    pub fn load(path: &Path) -> Result<LoadedConfig> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        let config = Self::from_yaml_str(&raw).map_err(|e| match e {
            Error::YamlParseFailed { reason, .. } => Error::yaml_parse_failed(path, reason),
            other => other,
        })?;
        debug!(path = %path.display(), "Loaded configuration");
        config.validate()
    }

    /// Parse a configuration document without validating it.
    ///
    /// # Errors
    ///
    /// Returns `YamlParseFailed` on malformed input.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::yaml_parse_failed("<inline>", e.to_string()))
    }

    /// Validate the configuration and build its derived artifacts.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for missing or out-of-range fields and a
    /// template error when the OBS switch is on but the template cannot be
    /// read or compiled.
    pub fn validate(self) -> Result<LoadedConfig> {
        self.watching_files.validate()?;

        if self.concurrent_size == 0 {
            return Err(Error::config_invalid("concurrent_size must be bigger than 0"));
        }
        if self.queue_size == 0 {
            return Err(Error::config_invalid("queue_size must be bigger than 0"));
        }
        if self.default_base_branch.trim().is_empty() {
            return Err(Error::config_invalid("default_base_branch must not be empty"));
        }

        let project_template = if self.enable_creating_obs_meta_project {
            Some(self.obs_meta_project.validate()?)
        } else {
            None
        };

        Ok(LoadedConfig {
            config: self,
            project_template,
        })
    }

    /// The pause between cycle starts, `None` for continuous cycling.
    #[must_use]
    pub fn cycle_interval(&self) -> Option<Duration> {
        u64::try_from(self.interval)
            .ok()
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
    }
}

fn default_base_url() -> String {
    "https://gitee.com/api/v5".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_queue_size() -> usize {
    1024
}

fn default_base_branch() -> String {
    "master".to_string()
}

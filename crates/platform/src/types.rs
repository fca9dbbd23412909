//! Wire types shared by every platform implementation.

use serde::{Deserialize, Serialize};

/// A branch as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub protected: bool,
}

/// Repository metadata as returned by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Repository path (the name used in API URLs).
    #[serde(rename = "path")]
    pub name: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,

    #[serde(default)]
    pub private: bool,

    #[serde(default = "default_true")]
    pub can_comment: bool,

    /// Logins of the repository members.
    #[serde(default)]
    pub members: Vec<String>,
}

/// Parameters for creating a repository in an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateRepoParams {
    pub name: String,
    pub description: String,
    pub private: bool,
    pub can_comment: bool,
    pub has_issues: bool,
    pub has_wiki: bool,
    /// Initialise the default branch with a README.
    pub auto_init: bool,
}

impl CreateRepoParams {
    /// Parameters with the defaults the watcher always creates with.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            private: false,
            can_comment: true,
            has_issues: true,
            has_wiki: true,
            auto_init: true,
        }
    }
}

/// A metadata update. The platform requires `name` on every patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoPatch {
    pub name: String,
    pub description: String,
    pub private: bool,
    pub can_comment: bool,
}

/// Reviewer configuration applied to new repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewerSettings {
    /// Comma separated logins.
    pub assignees: String,
    /// Comma separated logins.
    pub testers: String,
    pub assignees_number: u32,
    pub testers_number: u32,
}

const fn default_true() -> bool {
    true
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

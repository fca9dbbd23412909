//! Core types for the reconciler.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use watcher_core::Permission;
use watcher_platform::RepoInfo;

/// Repository metadata the watcher keeps in line with governance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoProperty {
    pub description: String,
    pub private: bool,
    pub can_comment: bool,
}

impl Default for RepoProperty {
    fn default() -> Self {
        Self {
            description: String::new(),
            private: false,
            can_comment: true,
        }
    }
}

impl From<&RepoInfo> for RepoProperty {
    fn from(info: &RepoInfo) -> Self {
        Self {
            description: info.description.clone(),
            private: info.private,
            can_comment: info.can_comment,
        }
    }
}

/// A branch governance wants to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredBranch {
    pub name: String,
    /// Whether the branch must be protected.
    pub protected: bool,
    /// Branch to create it from; the configured default base when unset.
    pub create_from: Option<String>,
}

impl DesiredBranch {
    pub fn protected(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protected: true,
            create_from: None,
        }
    }
}

/// Desired state of one repository, rebuilt from governance every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRepository {
    pub org: String,
    pub name: String,
    pub branches: BTreeMap<String, DesiredBranch>,
    /// Governed owners. `None` when no sig claims the repository, in which
    /// case membership is left alone.
    pub owners: Option<BTreeSet<String>>,
    pub property: RepoProperty,
}

impl DesiredRepository {
    /// Create a desired repository with no branches and no governed owners.
    pub fn new(org: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            name: name.into(),
            branches: BTreeMap::new(),
            owners: None,
            property: RepoProperty::default(),
        }
    }

    /// Add a branch.
    #[must_use]
    pub fn with_branch(mut self, branch: DesiredBranch) -> Self {
        self.branches.insert(branch.name.clone(), branch);
        self
    }

    /// Set the governed owners.
    #[must_use]
    pub fn with_owners<I, S>(mut self, owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.owners = Some(owners.into_iter().map(Into::into).collect());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.property.description = description.into();
        self
    }
}

/// The full desired set for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    pub org: String,
    pub repos: BTreeMap<String, DesiredRepository>,
}

impl DesiredState {
    /// Create a new empty desired state for an org.
    pub fn new(org: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            repos: BTreeMap::new(),
        }
    }

    /// Add a repository to the desired state.
    pub fn add_repo(&mut self, repo: DesiredRepository) {
        self.repos.insert(repo.name.clone(), repo);
    }

    /// Remove a repository from the desired state.
    pub fn remove_repo(&mut self, name: &str) {
        self.repos.remove(name);
    }

    /// Names of every governed repository.
    pub fn names(&self) -> BTreeSet<String> {
        self.repos.keys().cloned().collect()
    }

    /// Get the number of repositories.
    pub fn len(&self) -> usize {
        self.repos.len()
    }

    /// Check if the desired state is empty.
    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}

/// Protection status of an observed branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Protected,
    Unprotected,
}

impl From<bool> for Protection {
    fn from(protected: bool) -> Self {
        if protected {
            Self::Protected
        } else {
            Self::Unprotected
        }
    }
}

/// What the watcher last saw (or made) true on the platform for one
/// repository. Lives only in memory and only inside a
/// [`crate::ResourceActor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedState {
    /// The repository exists on the platform.
    pub available: bool,
    pub branches: BTreeMap<String, Protection>,
    pub members: BTreeMap<String, Permission>,
    /// `None` until metadata has been read or written.
    pub property: Option<RepoProperty>,
    /// The creation-time descriptor still has to be committed.
    pub descriptor_pending: bool,
}

impl ObservedState {
    /// Observed state of a repository listed by the platform at startup.
    pub fn from_listing(info: &RepoInfo) -> Self {
        Self {
            available: true,
            branches: BTreeMap::new(),
            members: info
                .members
                .iter()
                .map(|login| (login.clone(), Permission::Push))
                .collect(),
            property: Some(RepoProperty::from(info)),
            descriptor_pending: false,
        }
    }
}

/// Actions the reconciler can take against the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Create the repository.
    CreateRepo,
    /// Apply the default reviewer configuration.
    SetReviewer,
    /// Commit the OBS meta project descriptor.
    PublishDescriptor { path: String },
    /// Re-read the branch list.
    RefreshBranches,
    /// Re-read repository metadata.
    RefreshProperty,
    CreateBranch { branch: String, from: String },
    ProtectBranch { branch: String },
    UnprotectBranch { branch: String },
    AddMember { login: String, permission: Permission },
    RemoveMember { login: String },
    UpdateProperty,
}

impl ReconcileAction {
    /// Short operation name, used as a log field.
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::CreateRepo => "create_repo",
            Self::SetReviewer => "set_repo_reviewer",
            Self::PublishDescriptor { .. } => "create_file",
            Self::RefreshBranches => "list_branches",
            Self::RefreshProperty => "get_repo",
            Self::CreateBranch { .. } => "create_branch",
            Self::ProtectBranch { .. } => "set_branch_protection",
            Self::UnprotectBranch { .. } => "cancel_branch_protection",
            Self::AddMember { .. } => "add_member",
            Self::RemoveMember { .. } => "remove_member",
            Self::UpdateProperty => "update_repo",
        }
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateRepo => write!(f, "create repository"),
            Self::SetReviewer => write!(f, "set reviewer"),
            Self::PublishDescriptor { path } => write!(f, "publish descriptor {path}"),
            Self::RefreshBranches => write!(f, "refresh branches"),
            Self::RefreshProperty => write!(f, "refresh metadata"),
            Self::CreateBranch { branch, from } => write!(f, "create branch {branch} from {from}"),
            Self::ProtectBranch { branch } => write!(f, "protect branch {branch}"),
            Self::UnprotectBranch { branch } => write!(f, "unprotect branch {branch}"),
            Self::AddMember { login, permission } => {
                write!(f, "add member {login} ({permission})")
            }
            Self::RemoveMember { login } => write!(f, "remove member {login}"),
            Self::UpdateProperty => write!(f, "update metadata"),
        }
    }
}

/// Result of one convergence task.
#[derive(Debug, Clone, Default)]
pub struct ReconcileResult {
    /// Actions that succeeded.
    pub actions_taken: Vec<ReconcileAction>,
    /// Actions that failed, with the platform error.
    pub actions_failed: Vec<(ReconcileAction, String)>,
}

impl ReconcileResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nothing had to be done.
    pub fn converged(&self) -> bool {
        self.actions_taken.is_empty() && self.actions_failed.is_empty()
    }

    /// Check if all actions succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.actions_failed.is_empty()
    }

    /// Total number of platform calls issued.
    pub fn calls(&self) -> usize {
        self.actions_taken.len().saturating_add(self.actions_failed.len())
    }
}

//! Desired-state builder.
//!
//! Turns the governance files (repository file, sig file and one OWNERS
//! file per sig) into a [`DesiredState`]. The output is a pure function of
//! the files at call time; nothing is cached between cycles.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use itertools::Itertools;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use watcher_core::{RepoBranch, WatchingFiles};
use watcher_platform::PlatformClient;

use crate::error::{Error, Result};
use crate::r#loop::DesiredStateProvider;
use crate::types::{DesiredBranch, DesiredRepository, DesiredState, RepoProperty};

const OWNERS_FILE: &str = "OWNERS";

/// Where governance files are read from.
#[async_trait]
pub trait GovernanceSource: Send + Sync {
    /// Read one file, `path` relative to the governance root.
    async fn read_file(&self, path: &str) -> Result<String>;

    /// List every file below `dir`, as paths relative to the governance root.
    async fn list_files(&self, dir: &str) -> Result<Vec<String>>;
}

/// Reads governance files from a branch of a repository on the platform.
pub struct PlatformGovernanceSource {
    client: Arc<dyn PlatformClient>,
    location: RepoBranch,
}

impl PlatformGovernanceSource {
    pub fn new(client: Arc<dyn PlatformClient>, location: RepoBranch) -> Self {
        Self { client, location }
    }
}

#[async_trait]
impl GovernanceSource for PlatformGovernanceSource {
    async fn read_file(&self, path: &str) -> Result<String> {
        let RepoBranch { org, repo, branch } = &self.location;
        self.client
            .get_path_content(org, repo, path, branch)
            .await
            .map_err(|e| Error::governance_load(path, e.to_string()))
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let RepoBranch { org, repo, branch } = &self.location;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let tree = self
            .client
            .get_directory_tree(org, repo, branch)
            .await
            .map_err(|e| Error::governance_load(dir, e.to_string()))?;

        Ok(tree.into_iter().filter(|path| path.starts_with(&prefix)).collect())
    }
}

/// Reads governance files from a local checkout.
#[derive(Debug, Clone)]
pub struct FsGovernanceSource {
    root: PathBuf,
}

impl FsGovernanceSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root).ok().map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .join("/")
        })
    }
}

#[async_trait]
impl GovernanceSource for FsGovernanceSource {
    async fn read_file(&self, path: &str) -> Result<String> {
        tokio::fs::read_to_string(self.root.join(path))
            .await
            .map_err(|e| Error::governance_load(path, e.to_string()))
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let mut pending = vec![self.root.join(dir)];
        let mut files = Vec::new();

        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current)
                .await
                .map_err(|e| Error::governance_load(dir, e.to_string()))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::governance_load(dir, e.to_string()))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::governance_load(dir, e.to_string()))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Some(rel) = self.relative(&path) {
                    files.push(rel);
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryFile {
    community: String,
    #[serde(default)]
    repositories: Vec<RepositoryEntry>,
}

#[derive(Debug, Deserialize)]
struct RepositoryEntry {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "type")]
    visibility: Visibility,
    #[serde(default = "default_true")]
    commentable: bool,
    #[serde(default)]
    branches: Vec<BranchEntry>,
    #[serde(default)]
    protected_branches: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Visibility {
    #[default]
    Public,
    Private,
}

#[derive(Debug, Deserialize)]
struct BranchEntry {
    name: String,
    #[serde(default, rename = "type")]
    kind: BranchKind,
    #[serde(default)]
    create_from: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BranchKind {
    #[default]
    Protected,
    Unprotected,
}

#[derive(Debug, Deserialize)]
struct SigFile {
    #[serde(default)]
    sigs: Vec<SigEntry>,
}

#[derive(Debug, Deserialize)]
struct SigEntry {
    name: String,
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OwnersFile {
    #[serde(default)]
    maintainers: Vec<String>,
}

const fn default_true() -> bool {
    true
}

fn parse<T: DeserializeOwned>(path: &str, raw: &str) -> Result<T> {
    serde_yaml::from_str(raw).map_err(|e| Error::governance_load(path, e.to_string()))
}

impl RepositoryEntry {
    fn into_desired(self, org: &str, owners: Option<BTreeSet<String>>) -> DesiredRepository {
        let mut branches: BTreeMap<String, DesiredBranch> = self
            .branches
            .into_iter()
            .map(|b| {
                let branch = DesiredBranch {
                    name: b.name,
                    protected: b.kind == BranchKind::Protected,
                    create_from: b.create_from.filter(|from| !from.is_empty()),
                };
                (branch.name.clone(), branch)
            })
            .collect();

        for name in self.protected_branches {
            branches
                .entry(name.clone())
                .and_modify(|b| b.protected = true)
                .or_insert_with(|| DesiredBranch::protected(name));
        }

        DesiredRepository {
            org: org.to_string(),
            name: self.name,
            branches,
            owners,
            property: RepoProperty {
                description: self.description,
                private: matches!(self.visibility, Visibility::Private),
                can_comment: self.commentable,
            },
        }
    }
}

/// Build the desired state from governance files.
///
/// # Errors
///
/// Returns `GovernanceLoad` when a file is missing or malformed, when two
/// repositories share a name, or when a sig has no OWNERS file.
pub async fn build(
    source: &dyn GovernanceSource,
    repo_file_path: &str,
    sig_file_path: &str,
    sig_dir: &str,
) -> Result<DesiredState> {
    let repo_file: RepositoryFile =
        parse(repo_file_path, &source.read_file(repo_file_path).await?)?;
    let org = repo_file.community;

    if let Some(dup) = repo_file
        .repositories
        .iter()
        .map(|r| r.name.as_str())
        .duplicates()
        .next()
    {
        return Err(Error::governance_load(
            repo_file_path,
            format!("duplicate repository '{dup}'"),
        ));
    }
    let known: BTreeSet<&str> = repo_file.repositories.iter().map(|r| r.name.as_str()).collect();

    let sig_file: SigFile = parse(sig_file_path, &source.read_file(sig_file_path).await?)?;
    let sig_dir = sig_dir.trim_end_matches('/');
    let owners_files: BTreeSet<String> = source.list_files(sig_dir).await?.into_iter().collect();
    let owners_files = &owners_files;

    let maintainers = try_join_all(sig_file.sigs.iter().map(|sig| async move {
        let path = format!("{sig_dir}/{}/{OWNERS_FILE}", sig.name);
        if !owners_files.contains(&path) {
            return Err(Error::governance_load(
                path,
                format!("sig '{}' has no OWNERS file", sig.name),
            ));
        }
        let owners: OwnersFile = parse(&path, &source.read_file(&path).await?)?;
        Ok(owners.maintainers)
    }))
    .await?;

    let mut owners: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (sig, maintainers) in sig_file.sigs.iter().zip(maintainers) {
        for entry in &sig.repositories {
            let (entry_org, repo) = entry.split_once('/').unwrap_or((org.as_str(), entry.as_str()));
            if entry_org != org || !known.contains(repo) {
                debug!(sig = %sig.name, repo = %entry, "Ignoring sig entry outside the repository file");
                continue;
            }
            owners
                .entry(repo.to_string())
                .or_default()
                .extend(maintainers.iter().cloned());
        }
    }

    let mut desired = DesiredState::new(org.clone());
    for entry in repo_file.repositories {
        let repo_owners = owners.remove(&entry.name);
        if repo_owners.is_none() {
            warn!(org = %org, repo = %entry.name, "Repository belongs to no sig, membership not managed");
        }
        desired.add_repo(entry.into_desired(&org, repo_owners));
    }

    debug!(org = %desired.org, repos = desired.len(), "Built desired state");
    Ok(desired)
}

/// [`DesiredStateProvider`] that rebuilds the desired state from governance
/// files on every call.
pub struct GovernanceBuilder {
    source: Arc<dyn GovernanceSource>,
    repo_file_path: String,
    sig_file_path: String,
    sig_dir: String,
}

impl GovernanceBuilder {
    pub fn new(source: Arc<dyn GovernanceSource>, files: &WatchingFiles) -> Self {
        Self {
            source,
            repo_file_path: files.repo_file_path.clone(),
            sig_file_path: files.sig_file_path.clone(),
            sig_dir: files.sig_dir.clone(),
        }
    }
}

#[async_trait]
impl DesiredStateProvider for GovernanceBuilder {
    async fn get_desired_state(&self) -> Result<DesiredState> {
        build(
            self.source.as_ref(),
            &self.repo_file_path,
            &self.sig_file_path,
            &self.sig_dir,
        )
        .await
    }
}

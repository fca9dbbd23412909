//! A process-local platform.
//!
//! Keeps repositories, branches, members and files in memory, records
//! every call it receives and can be told to fail specific calls. Used by
//! the reconciler's tests and by `--dry-run`.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use watcher_core::Permission;

use crate::client::PlatformClient;
use crate::error::{Error, Result};
use crate::types::{Branch, CreateRepoParams, RepoInfo, RepoPatch, ReviewerSettings};

const DEFAULT_BRANCH: &str = "master";

/// Recorded calls kept before the oldest are dropped.
pub const CALL_LOG_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Default)]
struct FakeRepo {
    info: RepoInfo,
    branches: BTreeMap<String, bool>,
    members: BTreeMap<String, Permission>,
    reviewer: Option<ReviewerSettings>,
    files: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    repos: BTreeMap<(String, String), FakeRepo>,
    calls: VecDeque<String>,
    failures: HashMap<String, usize>,
}

/// In-memory implementation of [`PlatformClient`].
///
/// Calls are recorded as `"<operation> <repo>[ <argument>]"`, for example
/// `"set_branch_protection alpha release"`; org-level calls use the org in
/// place of the repo. Only the latest [`CALL_LOG_CAPACITY`] calls are kept.
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    inner: Mutex<Inner>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a repository.
    pub async fn insert_repo(&self, org: &str, info: RepoInfo) {
        let mut inner = self.inner.lock().await;
        let members = info
            .members
            .iter()
            .map(|login| (login.clone(), Permission::Push))
            .collect();
        inner.repos.insert(
            (org.to_string(), info.name.clone()),
            FakeRepo {
                info,
                members,
                ..FakeRepo::default()
            },
        );
    }

    /// Seed a branch on an existing repository.
    pub async fn insert_branch(&self, org: &str, repo: &str, branch: &str, protected: bool) {
        let mut inner = self.inner.lock().await;
        if let Some(fake) = inner.repos.get_mut(&key(org, repo)) {
            fake.branches.insert(branch.to_string(), protected);
        }
    }

    /// Seed a file, creating the repository if needed.
    pub async fn insert_file(&self, org: &str, repo: &str, path: &str, content: &str) {
        let mut inner = self.inner.lock().await;
        let fake = inner.repos.entry(key(org, repo)).or_insert_with(|| FakeRepo {
            info: RepoInfo {
                name: repo.to_string(),
                can_comment: true,
                ..RepoInfo::default()
            },
            ..FakeRepo::default()
        });
        fake.files.insert(path.to_string(), content.to_string());
    }

    /// Make the next `times` calls recorded as `call` fail with a 500.
    pub async fn fail_on(&self, call: &str, times: usize) {
        self.inner
            .lock()
            .await
            .failures
            .insert(call.to_string(), times);
    }

    /// Every call received so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.inner.lock().await.calls.iter().cloned().collect()
    }

    /// Forget the recorded calls.
    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    pub async fn repo_exists(&self, org: &str, repo: &str) -> bool {
        self.inner.lock().await.repos.contains_key(&key(org, repo))
    }

    /// Branch name to protection flag.
    pub async fn branches(&self, org: &str, repo: &str) -> BTreeMap<String, bool> {
        self.inner
            .lock()
            .await
            .repos
            .get(&key(org, repo))
            .map(|fake| fake.branches.clone())
            .unwrap_or_default()
    }

    /// Member login to permission.
    pub async fn members(&self, org: &str, repo: &str) -> BTreeMap<String, Permission> {
        self.inner
            .lock()
            .await
            .repos
            .get(&key(org, repo))
            .map(|fake| fake.members.clone())
            .unwrap_or_default()
    }

    pub async fn file(&self, org: &str, repo: &str, path: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .repos
            .get(&key(org, repo))
            .and_then(|fake| fake.files.get(path).cloned())
    }

    pub async fn reviewer(&self, org: &str, repo: &str) -> Option<ReviewerSettings> {
        self.inner
            .lock()
            .await
            .repos
            .get(&key(org, repo))
            .and_then(|fake| fake.reviewer.clone())
    }
}

fn key(org: &str, repo: &str) -> (String, String) {
    (org.to_string(), repo.to_string())
}

impl Inner {
    /// Record a call and consume an injected failure for it, if any.
    fn record(&mut self, call: String) -> Result<()> {
        let injected = match self.failures.get_mut(&call) {
            Some(remaining) if *remaining > 0 => {
                *remaining = remaining.saturating_sub(1);
                true
            }
            _ => false,
        };
        let operation = call.split(' ').next().unwrap_or_default().to_string();
        if self.calls.len() >= CALL_LOG_CAPACITY {
            self.calls.pop_front();
        }
        self.calls.push_back(call);

        if injected {
            return Err(Error::request_failed(operation, 500, "injected failure"));
        }
        Ok(())
    }

    fn repo_mut(&mut self, org: &str, repo: &str) -> Result<&mut FakeRepo> {
        self.repos
            .get_mut(&key(org, repo))
            .ok_or_else(|| Error::not_found(format!("{org}/{repo}")))
    }

    fn repo(&self, org: &str, repo: &str) -> Result<&FakeRepo> {
        self.repos
            .get(&key(org, repo))
            .ok_or_else(|| Error::not_found(format!("{org}/{repo}")))
    }
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    async fn list_repos(&self, org: &str) -> Result<Vec<RepoInfo>> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("list_repos {org}"))?;
        Ok(inner
            .repos
            .iter()
            .filter(|((o, _), _)| o == org)
            .map(|(_, fake)| {
                let mut info = fake.info.clone();
                info.members = fake.members.keys().cloned().collect();
                info
            })
            .collect())
    }

    async fn get_path_content(
        &self,
        org: &str,
        repo: &str,
        path: &str,
        _git_ref: &str,
    ) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("get_path_content {repo} {path}"))?;
        inner
            .repo(org, repo)?
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{org}/{repo}:{path}")))
    }

    async fn get_directory_tree(&self, org: &str, repo: &str, _git_ref: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("get_directory_tree {repo}"))?;
        Ok(inner.repo(org, repo)?.files.keys().cloned().collect())
    }

    async fn list_branches(&self, org: &str, repo: &str) -> Result<Vec<Branch>> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("list_branches {repo}"))?;
        Ok(inner
            .repo(org, repo)?
            .branches
            .iter()
            .map(|(name, protected)| Branch {
                name: name.clone(),
                protected: *protected,
            })
            .collect())
    }

    async fn get_repo(&self, org: &str, repo: &str) -> Result<RepoInfo> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("get_repo {repo}"))?;
        let fake = inner.repo(org, repo)?;
        let mut info = fake.info.clone();
        info.members = fake.members.keys().cloned().collect();
        Ok(info)
    }

    async fn create_branch(&self, org: &str, repo: &str, branch: &str, parent: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("create_branch {repo} {branch}"))?;
        let fake = inner.repo_mut(org, repo)?;
        if !fake.branches.contains_key(parent) {
            return Err(Error::request_failed(
                "create_branch",
                400,
                format!("parent branch '{parent}' does not exist"),
            ));
        }
        fake.branches.entry(branch.to_string()).or_insert(false);
        Ok(())
    }

    async fn set_branch_protection(&self, org: &str, repo: &str, branch: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("set_branch_protection {repo} {branch}"))?;
        let flag = inner
            .repo_mut(org, repo)?
            .branches
            .get_mut(branch)
            .ok_or_else(|| Error::not_found(format!("branch {branch}")))?;
        *flag = true;
        Ok(())
    }

    async fn cancel_branch_protection(&self, org: &str, repo: &str, branch: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("cancel_branch_protection {repo} {branch}"))?;
        let flag = inner
            .repo_mut(org, repo)?
            .branches
            .get_mut(branch)
            .ok_or_else(|| Error::not_found(format!("branch {branch}")))?;
        *flag = false;
        Ok(())
    }

    async fn add_member(
        &self,
        org: &str,
        repo: &str,
        login: &str,
        permission: Permission,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("add_member {repo} {login}"))?;
        inner
            .repo_mut(org, repo)?
            .members
            .insert(login.to_string(), permission);
        Ok(())
    }

    async fn remove_member(&self, org: &str, repo: &str, login: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("remove_member {repo} {login}"))?;
        inner.repo_mut(org, repo)?.members.remove(login);
        Ok(())
    }

    async fn create_repo(&self, org: &str, params: &CreateRepoParams) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("create_repo {}", params.name))?;
        let repo_key = key(org, &params.name);
        if inner.repos.contains_key(&repo_key) {
            return Err(Error::request_failed(
                "create_repo",
                400,
                format!("repository '{}' already exists", params.name),
            ));
        }

        let mut fake = FakeRepo {
            info: RepoInfo {
                name: params.name.clone(),
                description: params.description.clone(),
                private: params.private,
                can_comment: params.can_comment,
                members: Vec::new(),
            },
            ..FakeRepo::default()
        };
        if params.auto_init {
            fake.branches.insert(DEFAULT_BRANCH.to_string(), false);
        }
        inner.repos.insert(repo_key, fake);
        Ok(())
    }

    async fn set_repo_reviewer(
        &self,
        org: &str,
        repo: &str,
        reviewer: &ReviewerSettings,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("set_repo_reviewer {repo}"))?;
        inner.repo_mut(org, repo)?.reviewer = Some(reviewer.clone());
        Ok(())
    }

    async fn update_repo(&self, org: &str, repo: &str, patch: &RepoPatch) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("update_repo {repo}"))?;
        let info = &mut inner.repo_mut(org, repo)?.info;
        info.description.clone_from(&patch.description);
        info.private = patch.private;
        info.can_comment = patch.can_comment;
        Ok(())
    }

    async fn create_file(
        &self,
        org: &str,
        repo: &str,
        _branch: &str,
        path: &str,
        content: &str,
        _message: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(format!("create_file {repo} {path}"))?;
        inner
            .repo_mut(org, repo)?
            .files
            .insert(path.to_string(), content.to_string());
        Ok(())
    }
}

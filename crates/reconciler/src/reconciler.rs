//! Convergence of one repository.
//!
//! [`Reconciler::reconcile`] is the transition handed to a
//! [`crate::ResourceActor`]: it takes the committed observed state, diffs it
//! against the desired repository, applies the corrections and returns the
//! state to commit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, info, warn};
use watcher_core::{Permission, WatcherConfig};
use watcher_platform::{CreateRepoParams, PlatformClient, RepoPatch, ReviewerSettings};

use crate::descriptor::DescriptorPublisher;
use crate::error::{Error, Result};
use crate::types::{
    DesiredRepository, ObservedState, Protection, ReconcileAction, ReconcileResult, RepoProperty,
};

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Permission granted to governed owners.
    pub default_permission: Permission,
    /// Base for new branches without `create_from`.
    pub default_base_branch: String,
    /// Logins never removed from a repository.
    pub member_exclusions: BTreeSet<String>,
    /// Reviewer configuration applied to new repositories.
    pub reviewer: ReviewerSettings,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            default_permission: Permission::Push,
            default_base_branch: "master".to_string(),
            member_exclusions: BTreeSet::new(),
            reviewer: ReviewerSettings::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Take the reconciler settings out of the watcher configuration.
    pub fn from_watcher(config: &WatcherConfig) -> Self {
        Self {
            default_permission: config.default_permission,
            default_base_branch: config.default_base_branch.clone(),
            member_exclusions: config.member_exclusions.iter().cloned().collect(),
            reviewer: ReviewerSettings {
                assignees: config.reviewer.assignees.join(","),
                testers: config.reviewer.testers.join(","),
                assignees_number: config.reviewer.assignees_number,
                testers_number: config.reviewer.testers_number,
            },
        }
    }
}

/// Diffs and applies one repository at a time against the platform.
pub struct Reconciler {
    client: Arc<dyn PlatformClient>,
    descriptor: Option<DescriptorPublisher>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        client: Arc<dyn PlatformClient>,
        descriptor: Option<DescriptorPublisher>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            client,
            descriptor,
            config,
        }
    }

    /// Compute and apply the next observed state of one repository.
    ///
    /// An unavailable repository is created and nothing else happens this
    /// pass; if creation fails but the repository turns out to exist, it is
    /// adopted as available with its listed metadata. An available one has
    /// its branches, members and metadata reconciled independently; a
    /// failing call is recorded in the result and leaves its part of the
    /// state untouched.
    ///
    /// # Errors
    ///
    /// Returns `CreationFailed` when the repository can neither be created
    /// nor found. The caller must not commit anything in that case.
    pub async fn reconcile(
        &self,
        desired: &DesiredRepository,
        observed: ObservedState,
    ) -> Result<(ObservedState, ReconcileResult)> {
        let mut result = ReconcileResult::new();

        let state = if observed.available {
            self.converge(desired, observed, &mut result).await
        } else {
            self.create(desired, &mut result).await?
        };

        if result.converged() {
            debug!("Repository converged");
        } else if result.all_succeeded() {
            info!(actions_taken = result.actions_taken.len(), "Repository reconciled");
        } else {
            warn!(
                actions_taken = result.actions_taken.len(),
                actions_failed = result.actions_failed.len(),
                "Repository partially reconciled"
            );
        }

        Ok((state, result))
    }

    async fn create(
        &self,
        desired: &DesiredRepository,
        result: &mut ReconcileResult,
    ) -> Result<ObservedState> {
        if let Err(e) = self.execute(desired, &ReconcileAction::CreateRepo).await {
            result.actions_failed.push((ReconcileAction::CreateRepo, e.to_string()));

            // The repository may already exist: swept and re-added, or
            // created by someone else after startup.
            return match self.client.get_repo(&desired.org, &desired.name).await {
                Ok(info) => {
                    info!("Repository already exists, adopting it");
                    result.actions_taken.push(ReconcileAction::RefreshProperty);
                    Ok(ObservedState::from_listing(&info))
                }
                Err(lookup) => {
                    warn!(error = %e, lookup = %lookup, "Repository creation failed");
                    Err(Error::creation_failed(&desired.name, e))
                }
            };
        }
        result.actions_taken.push(ReconcileAction::CreateRepo);
        info!("Created repository");

        self.apply(desired, ReconcileAction::SetReviewer, result).await;

        let descriptor_pending = match &self.descriptor {
            Some(descriptor) => {
                let action = ReconcileAction::PublishDescriptor {
                    path: descriptor.path(&desired.name),
                };
                !self.apply(desired, action, result).await
            }
            None => false,
        };

        Ok(ObservedState {
            available: true,
            descriptor_pending,
            ..ObservedState::default()
        })
    }

    async fn converge(
        &self,
        desired: &DesiredRepository,
        mut state: ObservedState,
        result: &mut ReconcileResult,
    ) -> ObservedState {
        if state.descriptor_pending {
            if let Some(descriptor) = &self.descriptor {
                let action = ReconcileAction::PublishDescriptor {
                    path: descriptor.path(&desired.name),
                };
                state.descriptor_pending = !self.apply(desired, action, result).await;
            } else {
                state.descriptor_pending = false;
            }
        }

        self.converge_branches(desired, &mut state, result).await;
        self.converge_members(desired, &mut state, result).await;
        self.converge_property(desired, &mut state, result).await;
        state
    }

    async fn converge_branches(
        &self,
        desired: &DesiredRepository,
        state: &mut ObservedState,
        result: &mut ReconcileResult,
    ) {
        if state.branches.is_empty() && !desired.branches.is_empty() {
            match self.client.list_branches(&desired.org, &desired.name).await {
                Ok(branches) => {
                    result.actions_taken.push(ReconcileAction::RefreshBranches);
                    state.branches = branches
                        .into_iter()
                        .map(|b| (b.name, Protection::from(b.protected)))
                        .collect();
                }
                Err(e) => {
                    warn!(error = %e, "Failed to list branches");
                    result
                        .actions_failed
                        .push((ReconcileAction::RefreshBranches, e.to_string()));
                    return;
                }
            }
        }

        for action in self.diff_branches(desired, &state.branches) {
            let target = match &action {
                ReconcileAction::ProtectBranch { branch }
                | ReconcileAction::UnprotectBranch { branch } => Some(branch),
                _ => None,
            };
            if target.is_some_and(|branch| !state.branches.contains_key(branch)) {
                // Creation failed earlier in this pass.
                continue;
            }
            if self.apply(desired, action.clone(), result).await {
                commit(state, desired, &action);
            }
        }
    }

    async fn converge_members(
        &self,
        desired: &DesiredRepository,
        state: &mut ObservedState,
        result: &mut ReconcileResult,
    ) {
        let Some(owners) = &desired.owners else {
            return;
        };

        for action in self.diff_members(owners, &state.members) {
            if self.apply(desired, action.clone(), result).await {
                commit(state, desired, &action);
            }
        }
    }

    async fn converge_property(
        &self,
        desired: &DesiredRepository,
        state: &mut ObservedState,
        result: &mut ReconcileResult,
    ) {
        let observed = match &state.property {
            Some(property) => property.clone(),
            None => match self.client.get_repo(&desired.org, &desired.name).await {
                Ok(info) => {
                    result.actions_taken.push(ReconcileAction::RefreshProperty);
                    let property = RepoProperty::from(&info);
                    state.property = Some(property.clone());
                    property
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read repository metadata");
                    result
                        .actions_failed
                        .push((ReconcileAction::RefreshProperty, e.to_string()));
                    return;
                }
            },
        };

        if observed != desired.property {
            let action = ReconcileAction::UpdateProperty;
            if self.apply(desired, action.clone(), result).await {
                commit(state, desired, &action);
            }
        }
    }

    /// Branch corrections. Missing branches are created in dependency
    /// order, so a chain of `create_from` bases converges in one pass;
    /// branches whose base never appears go last.
    fn diff_branches(
        &self,
        desired: &DesiredRepository,
        observed: &BTreeMap<String, Protection>,
    ) -> Vec<ReconcileAction> {
        let mut actions = Vec::new();

        let mut pending = desired
            .branches
            .values()
            .filter(|b| !observed.contains_key(&b.name))
            .collect_vec();
        let mut present: BTreeSet<&str> = observed.keys().map(String::as_str).collect();
        let mut missing = Vec::with_capacity(pending.len());
        loop {
            let (ready, blocked): (Vec<_>, Vec<_>) = pending.into_iter().partition(|b| {
                b.create_from
                    .as_deref()
                    .is_none_or(|from| present.contains(from))
            });
            pending = blocked;
            if ready.is_empty() {
                break;
            }
            present.extend(ready.iter().map(|b| b.name.as_str()));
            missing.extend(ready);
        }
        missing.extend(pending);

        for branch in missing {
            let from = branch
                .create_from
                .clone()
                .unwrap_or_else(|| self.config.default_base_branch.clone());
            actions.push(ReconcileAction::CreateBranch {
                branch: branch.name.clone(),
                from,
            });
            if branch.protected {
                actions.push(ReconcileAction::ProtectBranch {
                    branch: branch.name.clone(),
                });
            }
        }

        for (name, protection) in observed {
            let want_protected = desired.branches.get(name).is_some_and(|b| b.protected);
            match (protection, want_protected) {
                (Protection::Unprotected, true) => {
                    actions.push(ReconcileAction::ProtectBranch {
                        branch: name.clone(),
                    });
                }
                (Protection::Protected, false) => {
                    actions.push(ReconcileAction::UnprotectBranch {
                        branch: name.clone(),
                    });
                }
                _ => {}
            }
        }

        actions
    }

    fn diff_members(
        &self,
        owners: &BTreeSet<String>,
        observed: &BTreeMap<String, Permission>,
    ) -> Vec<ReconcileAction> {
        let add = owners
            .iter()
            .filter(|login| !observed.contains_key(*login))
            .map(|login| ReconcileAction::AddMember {
                login: login.clone(),
                permission: self.config.default_permission,
            });

        let remove = observed
            .keys()
            .filter(|login| !owners.contains(*login))
            .filter(|login| !self.config.member_exclusions.contains(*login))
            .map(|login| ReconcileAction::RemoveMember {
                login: login.clone(),
            });

        add.chain(remove).collect()
    }

    /// Apply one action, recording the outcome. Returns whether it succeeded.
    async fn apply(
        &self,
        desired: &DesiredRepository,
        action: ReconcileAction,
        result: &mut ReconcileResult,
    ) -> bool {
        debug!(action = %action, "Applying action");

        match self.execute(desired, &action).await {
            Ok(()) => {
                result.actions_taken.push(action);
                true
            }
            Err(e) => {
                warn!(action = %action, error = %e, "Action failed");
                result.actions_failed.push((action, e.to_string()));
                false
            }
        }
    }

    async fn execute(&self, desired: &DesiredRepository, action: &ReconcileAction) -> Result<()> {
        let org = desired.org.as_str();
        let repo = desired.name.as_str();

        let outcome = match action {
            ReconcileAction::CreateRepo => {
                let params = CreateRepoParams {
                    description: desired.property.description.clone(),
                    private: desired.property.private,
                    can_comment: desired.property.can_comment,
                    ..CreateRepoParams::new(repo)
                };
                self.client.create_repo(org, &params).await
            }
            ReconcileAction::SetReviewer => {
                self.client
                    .set_repo_reviewer(org, repo, &self.config.reviewer)
                    .await
            }
            ReconcileAction::PublishDescriptor { .. } => {
                return match &self.descriptor {
                    Some(descriptor) => descriptor.publish(repo).await,
                    None => Err(Error::invalid_config("descriptor publishing is disabled")),
                };
            }
            ReconcileAction::RefreshBranches => self.client.list_branches(org, repo).await.map(drop),
            ReconcileAction::RefreshProperty => self.client.get_repo(org, repo).await.map(drop),
            ReconcileAction::CreateBranch { branch, from } => {
                self.client.create_branch(org, repo, branch, from).await
            }
            ReconcileAction::ProtectBranch { branch } => {
                self.client.set_branch_protection(org, repo, branch).await
            }
            ReconcileAction::UnprotectBranch { branch } => {
                self.client.cancel_branch_protection(org, repo, branch).await
            }
            ReconcileAction::AddMember { login, permission } => {
                self.client.add_member(org, repo, login, *permission).await
            }
            ReconcileAction::RemoveMember { login } => {
                self.client.remove_member(org, repo, login).await
            }
            ReconcileAction::UpdateProperty => {
                let patch = RepoPatch {
                    name: repo.to_string(),
                    description: desired.property.description.clone(),
                    private: desired.property.private,
                    can_comment: desired.property.can_comment,
                };
                self.client.update_repo(org, repo, &patch).await
            }
        };

        outcome.map_err(|e| {
            debug!(
                operation = action.operation(),
                transient = e.is_transient(),
                "Platform call failed"
            );
            Error::platform(action.operation(), e)
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

/// Fold a successful action into the observed state.
fn commit(state: &mut ObservedState, desired: &DesiredRepository, action: &ReconcileAction) {
    match action {
        ReconcileAction::CreateBranch { branch, .. } => {
            state.branches.insert(branch.clone(), Protection::Unprotected);
        }
        ReconcileAction::ProtectBranch { branch } => {
            state.branches.insert(branch.clone(), Protection::Protected);
        }
        ReconcileAction::UnprotectBranch { branch } => {
            state.branches.insert(branch.clone(), Protection::Unprotected);
        }
        ReconcileAction::AddMember { login, permission } => {
            state.members.insert(login.clone(), *permission);
        }
        ReconcileAction::RemoveMember { login } => {
            state.members.remove(login);
        }
        ReconcileAction::UpdateProperty => {
            state.property = Some(desired.property.clone());
        }
        ReconcileAction::CreateRepo
        | ReconcileAction::SetReviewer
        | ReconcileAction::PublishDescriptor { .. }
        | ReconcileAction::RefreshBranches
        | ReconcileAction::RefreshProperty => {}
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    client: Option<Arc<dyn PlatformClient>>,
    descriptor: Option<DescriptorPublisher>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            client: None,
            descriptor: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the platform client.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn PlatformClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Publish a project descriptor for every repository created.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: DescriptorPublisher) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the permission granted to owners.
    #[must_use]
    pub fn default_permission(mut self, permission: Permission) -> Self {
        self.config.default_permission = permission;
        self
    }

    /// Add a login that is never removed.
    #[must_use]
    pub fn exclude_member(mut self, login: impl Into<String>) -> Self {
        self.config.member_exclusions.insert(login.into());
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if no client was set.
    pub fn build(self) -> Result<Reconciler> {
        let client = self
            .client
            .ok_or_else(|| Error::invalid_config("Platform client is required"))?;

        Ok(Reconciler::new(client, self.descriptor, self.config))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::types::DesiredBranch;
    use watcher_core::{ObsMetaProject, ProjectTemplate, RepoBranch};
    use watcher_platform::{InMemoryPlatform, RepoInfo};

    const ORG: &str = "openeuler";

    fn setup() -> (Reconciler, Arc<InMemoryPlatform>) {
        let platform = Arc::new(InMemoryPlatform::new());
        let reconciler = ReconcilerBuilder::new()
            .with_client(platform.clone())
            .build()
            .unwrap();
        (reconciler, platform)
    }

    fn alpha() -> DesiredRepository {
        DesiredRepository::new(ORG, "alpha")
            .with_branch(DesiredBranch::protected("main"))
            .with_branch(DesiredBranch::protected("release"))
            .with_owners(["alice", "bob"])
    }

    async fn seed_alpha(platform: &InMemoryPlatform) {
        platform
            .insert_repo(
                ORG,
                RepoInfo {
                    name: "alpha".to_string(),
                    can_comment: true,
                    ..RepoInfo::default()
                },
            )
            .await;
        platform.insert_branch(ORG, "alpha", "master", false).await;
    }

    fn available() -> ObservedState {
        ObservedState {
            available: true,
            ..ObservedState::default()
        }
    }

    #[test]
    fn test_builder_requires_client() {
        assert!(matches!(
            ReconcilerBuilder::new().build(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_repo_is_created_only() {
        let (reconciler, platform) = setup();

        let (state, result) = reconciler
            .reconcile(&alpha(), ObservedState::default())
            .await
            .unwrap();

        assert!(state.available);
        assert!(state.branches.is_empty());
        assert!(state.members.is_empty());
        assert_eq!(state.property, None);
        assert!(platform.repo_exists(ORG, "alpha").await);
        assert_eq!(
            platform.calls().await,
            vec!["create_repo alpha", "set_repo_reviewer alpha"]
        );
        assert!(result.all_succeeded());
    }

    #[tokio::test]
    async fn test_failed_creation_is_an_error() {
        let (reconciler, platform) = setup();
        platform.fail_on("create_repo alpha", 1).await;

        let err = reconciler
            .reconcile(&alpha(), ObservedState::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CreationFailed { .. }));
        assert_eq!(
            platform.calls().await,
            vec!["create_repo alpha", "get_repo alpha"]
        );
    }

    #[tokio::test]
    async fn test_existing_repo_is_adopted_when_creation_fails() {
        let (reconciler, platform) = setup();
        platform
            .insert_repo(
                ORG,
                RepoInfo {
                    name: "alpha".to_string(),
                    description: "already here".to_string(),
                    members: vec!["alice".to_string()],
                    ..RepoInfo::default()
                },
            )
            .await;

        let (state, result) = reconciler
            .reconcile(&alpha(), ObservedState::default())
            .await
            .unwrap();

        assert!(state.available);
        assert!(state.members.contains_key("alice"));
        assert_eq!(
            state.property.map(|p| p.description),
            Some("already here".to_string())
        );
        assert_eq!(
            platform.calls().await,
            vec!["create_repo alpha", "get_repo alpha"]
        );
        assert_eq!(result.actions_failed.len(), 1);
        assert_eq!(result.actions_taken, vec![ReconcileAction::RefreshProperty]);
    }

    #[tokio::test]
    async fn test_configured_reviewer_is_applied_on_creation() {
        let watcher = WatcherConfig::from_yaml_str(
            r"
watching_files:
  org: openeuler
  repo: community
  branch: master
  repo_file_path: repository/openeuler.yaml
  sig_file_path: sig/sigs.yaml
  sig_dir: sig
concurrent_size: 1
reviewer:
  assignees: [alice, bob]
  assignees_number: 1
",
        )
        .unwrap();
        let platform = Arc::new(InMemoryPlatform::new());
        let reconciler = ReconcilerBuilder::new()
            .with_client(platform.clone())
            .with_config(ReconcilerConfig::from_watcher(&watcher))
            .build()
            .unwrap();

        reconciler
            .reconcile(&alpha(), ObservedState::default())
            .await
            .unwrap();

        let reviewer = platform.reviewer(ORG, "alpha").await.unwrap();
        assert_eq!(reviewer.assignees, "alice,bob");
        assert_eq!(reviewer.assignees_number, 1);
        assert_eq!(reviewer.testers, "");
    }

    #[tokio::test]
    async fn test_reviewer_failure_does_not_fail_creation() {
        let (reconciler, platform) = setup();
        platform.fail_on("set_repo_reviewer alpha", 1).await;

        let (state, result) = reconciler
            .reconcile(&alpha(), ObservedState::default())
            .await
            .unwrap();

        assert!(state.available);
        assert_eq!(result.actions_failed.len(), 1);
    }

    #[tokio::test]
    async fn test_creation_publishes_descriptor() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform
            .insert_repo(
                ORG,
                RepoInfo {
                    name: "obs_meta".to_string(),
                    ..RepoInfo::default()
                },
            )
            .await;
        let descriptor = DescriptorPublisher::new(
            platform.clone(),
            ObsMetaProject {
                branch: RepoBranch {
                    org: ORG.to_string(),
                    repo: "obs_meta".to_string(),
                    branch: "master".to_string(),
                },
                project_dir: "projects".to_string(),
                project_file_name: "_service".to_string(),
                project_template_path: "unused".into(),
            },
            ProjectTemplate::compile("name: {{ .Project }}").unwrap(),
        );
        let reconciler = ReconcilerBuilder::new()
            .with_client(platform.clone())
            .with_descriptor(descriptor)
            .build()
            .unwrap();
        platform.fail_on("create_file obs_meta projects/alpha/_service", 1).await;

        let (state, _) = reconciler
            .reconcile(&alpha(), ObservedState::default())
            .await
            .unwrap();
        assert!(state.available);
        assert!(state.descriptor_pending);

        platform.clear_calls().await;
        let (state, _) = reconciler.reconcile(&alpha(), state).await.unwrap();

        assert!(!state.descriptor_pending);
        assert!(!platform.calls().await.contains(&"create_repo alpha".to_string()));
        assert_eq!(
            platform
                .file(ORG, "obs_meta", "projects/alpha/_service")
                .await
                .as_deref(),
            Some("name: alpha")
        );
    }

    #[tokio::test]
    async fn test_available_repo_converges_all_facets() {
        let (reconciler, platform) = setup();
        seed_alpha(&platform).await;

        let (state, result) = reconciler.reconcile(&alpha(), available()).await.unwrap();

        assert!(result.all_succeeded());
        assert_eq!(state.branches.get("main"), Some(&Protection::Protected));
        assert_eq!(state.branches.get("release"), Some(&Protection::Protected));
        assert_eq!(state.branches.get("master"), Some(&Protection::Unprotected));
        assert_eq!(state.members.get("alice"), Some(&Permission::Push));
        assert_eq!(state.members.get("bob"), Some(&Permission::Push));
        assert!(state.property.is_some());

        let on_platform = platform.branches(ORG, "alpha").await;
        assert_eq!(on_platform.get("release"), Some(&true));
    }

    #[tokio::test]
    async fn test_converged_repo_issues_no_calls() {
        let (reconciler, platform) = setup();
        seed_alpha(&platform).await;
        let (state, _) = reconciler.reconcile(&alpha(), available()).await.unwrap();

        platform.clear_calls().await;
        let (again, result) = reconciler.reconcile(&alpha(), state.clone()).await.unwrap();

        assert!(result.converged());
        assert_eq!(again, state);
        assert!(platform.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_facet_failure_is_isolated() {
        let (reconciler, platform) = setup();
        seed_alpha(&platform).await;
        platform.fail_on("set_branch_protection alpha release", 1).await;

        let (state, result) = reconciler.reconcile(&alpha(), available()).await.unwrap();

        assert_eq!(result.actions_failed.len(), 1);
        assert_eq!(state.branches.get("release"), Some(&Protection::Unprotected));
        assert_eq!(state.branches.get("main"), Some(&Protection::Protected));
        assert_eq!(state.members.len(), 2);

        platform.clear_calls().await;
        let (state, _) = reconciler.reconcile(&alpha(), state).await.unwrap();
        assert_eq!(
            platform.calls().await,
            vec!["set_branch_protection alpha release"]
        );
        assert_eq!(state.branches.get("release"), Some(&Protection::Protected));
    }

    #[tokio::test]
    async fn test_failed_branch_creation_skips_protection() {
        let (reconciler, platform) = setup();
        seed_alpha(&platform).await;
        platform.fail_on("create_branch alpha release", 1).await;

        let (state, _) = reconciler.reconcile(&alpha(), available()).await.unwrap();

        assert!(!state.branches.contains_key("release"));
        assert!(
            !platform
                .calls()
                .await
                .contains(&"set_branch_protection alpha release".to_string())
        );
    }

    #[tokio::test]
    async fn test_undesired_protection_is_cancelled_not_deleted() {
        let (reconciler, platform) = setup();
        seed_alpha(&platform).await;
        platform.insert_branch(ORG, "alpha", "legacy", true).await;

        let desired = alpha().with_branch(DesiredBranch {
            name: "scratch".to_string(),
            protected: false,
            create_from: Some("main".to_string()),
        });
        let (state, _) = reconciler.reconcile(&desired, available()).await.unwrap();

        assert_eq!(state.branches.get("legacy"), Some(&Protection::Unprotected));
        assert_eq!(state.branches.get("scratch"), Some(&Protection::Unprotected));
        assert_eq!(platform.branches(ORG, "alpha").await.get("legacy"), Some(&false));
    }

    #[tokio::test]
    async fn test_branch_chain_is_created_base_first() {
        let (reconciler, platform) = setup();
        seed_alpha(&platform).await;

        let branch = |name: &str, from: Option<&str>| DesiredBranch {
            name: name.to_string(),
            protected: false,
            create_from: from.map(str::to_string),
        };
        let desired = DesiredRepository::new(ORG, "alpha")
            .with_branch(branch("early", Some("mid")))
            .with_branch(branch("mid", Some("zeta")))
            .with_branch(branch("zeta", None));

        let (state, result) = reconciler.reconcile(&desired, available()).await.unwrap();

        assert!(result.all_succeeded());
        let created: Vec<String> = platform
            .calls()
            .await
            .into_iter()
            .filter(|call| call.starts_with("create_branch"))
            .collect();
        assert_eq!(
            created,
            vec![
                "create_branch alpha zeta",
                "create_branch alpha mid",
                "create_branch alpha early",
            ]
        );
        assert_eq!(state.branches.len(), 4);
    }

    #[tokio::test]
    async fn test_members_removed_except_exclusions() {
        let platform = Arc::new(InMemoryPlatform::new());
        seed_alpha(&platform).await;
        let reconciler = ReconcilerBuilder::new()
            .with_client(platform.clone())
            .exclude_member("watcher-bot")
            .build()
            .unwrap();

        let mut observed = available();
        for login in ["alice", "bob", "watcher-bot"] {
            observed.members.insert(login.to_string(), Permission::Push);
        }
        let desired = DesiredRepository::new(ORG, "alpha").with_owners(["alice"]);

        let (state, _) = reconciler.reconcile(&desired, observed).await.unwrap();

        let members: Vec<&str> = state.members.keys().map(String::as_str).collect();
        assert_eq!(members, vec!["alice", "watcher-bot"]);
    }

    #[tokio::test]
    async fn test_unowned_repo_skips_membership() {
        let (reconciler, platform) = setup();
        seed_alpha(&platform).await;

        let mut observed = available();
        observed.members.insert("stranger".to_string(), Permission::Admin);
        let desired = DesiredRepository::new(ORG, "alpha");

        let (state, _) = reconciler.reconcile(&desired, observed).await.unwrap();

        assert!(state.members.contains_key("stranger"));
        assert!(
            !platform
                .calls()
                .await
                .iter()
                .any(|call| call.starts_with("remove_member"))
        );
    }

    #[tokio::test]
    async fn test_property_drift_is_updated() {
        let (reconciler, platform) = setup();
        seed_alpha(&platform).await;

        let desired = DesiredRepository::new(ORG, "alpha").with_description("new text");
        let (state, result) = reconciler.reconcile(&desired, available()).await.unwrap();

        assert!(result.actions_taken.contains(&ReconcileAction::UpdateProperty));
        assert_eq!(
            state.property.map(|p| p.description),
            Some("new text".to_string())
        );
    }
}

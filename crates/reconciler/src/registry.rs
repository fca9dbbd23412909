//! Observed-state registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use watcher_platform::PlatformClient;

use crate::actor::ResourceActor;
use crate::error::{Error, Result};
use crate::types::ObservedState;

/// Map from repository name to its [`ResourceActor`].
///
/// The map has its own lock, independent of the actors: get-or-create and
/// sweep only touch membership, never an actor's state.
#[derive(Debug, Default)]
pub struct Registry {
    actors: RwLock<HashMap<String, Arc<ResourceActor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry with every repository the org already has.
    ///
    /// # Errors
    ///
    /// Returns a platform error if the repositories cannot be listed.
    pub async fn load_from_platform(client: &dyn PlatformClient, org: &str) -> Result<Self> {
        let repos = client
            .list_repos(org)
            .await
            .map_err(|e| Error::platform("list_repos", e))?;

        let actors = repos
            .iter()
            .map(|info| {
                let actor = ResourceActor::with_state(&info.name, ObservedState::from_listing(info));
                (info.name.clone(), Arc::new(actor))
            })
            .collect::<HashMap<_, _>>();

        info!(org, repos = actors.len(), "Loaded observed state from platform");
        Ok(Self {
            actors: RwLock::new(actors),
        })
    }

    /// Return the actor for `name`, creating an unavailable one on first
    /// sight. Concurrent calls for one name get the same instance.
    pub async fn get_or_create(&self, name: &str) -> Arc<ResourceActor> {
        if let Some(actor) = self.actors.read().await.get(name) {
            return actor.clone();
        }

        self.actors
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ResourceActor::new(name)))
            .clone()
    }

    /// Drop every actor whose name is not in `current`. Returns the names
    /// removed. Tasks already holding a removed actor keep it.
    pub async fn sweep(&self, current: &BTreeSet<String>) -> Vec<String> {
        let mut actors = self.actors.write().await;
        let stale: Vec<String> = actors
            .keys()
            .filter(|name| !current.contains(*name))
            .cloned()
            .collect();

        for name in &stale {
            actors.remove(name);
            debug!(repo = %name, "Swept stale actor");
        }
        stale
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.actors.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.actors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.actors.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use std::convert::Infallible;

    use super::*;
    use watcher_platform::{InMemoryPlatform, RepoInfo};

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_instance() {
        let registry = Arc::new(Registry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_create("alpha").await })
            })
            .collect();

        let mut actors = Vec::new();
        for handle in handles {
            actors.push(handle.await.unwrap());
        }

        assert!(actors.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(registry.len().await, 1);
        assert!(!actors[0].snapshot().await.available);
    }

    #[tokio::test]
    async fn test_sweep_removes_exactly_absent_names() {
        let registry = Registry::new();
        for name in ["alpha", "beta", "gamma"] {
            registry.get_or_create(name).await;
        }

        let mut removed = registry.sweep(&names(&["alpha", "gamma", "delta"])).await;
        removed.sort();

        assert_eq!(removed, vec!["beta"]);
        assert!(registry.contains("alpha").await);
        assert!(!registry.contains("beta").await);
        assert!(!registry.contains("delta").await);
    }

    #[tokio::test]
    async fn test_swept_actor_stays_usable() {
        let registry = Registry::new();
        let held = registry.get_or_create("alpha").await;
        registry.sweep(&BTreeSet::new()).await;

        held.update(|mut state| async move {
            state.available = true;
            Ok::<_, Infallible>((state, ()))
        })
        .await
        .unwrap();

        assert!(held.snapshot().await.available);
        // A fresh lookup starts over.
        assert!(!registry.get_or_create("alpha").await.snapshot().await.available);
    }

    #[tokio::test]
    async fn test_load_from_platform_marks_listed_repos_available() {
        let platform = InMemoryPlatform::new();
        platform
            .insert_repo(
                "openeuler",
                RepoInfo {
                    name: "alpha".to_string(),
                    description: "first".to_string(),
                    can_comment: true,
                    members: vec!["alice".to_string()],
                    ..RepoInfo::default()
                },
            )
            .await;

        let registry = Registry::load_from_platform(&platform, "openeuler").await.unwrap();
        let state = registry.get_or_create("alpha").await.snapshot().await;

        assert!(state.available);
        assert!(state.branches.is_empty());
        assert!(state.members.contains_key("alice"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_load_from_platform_failure_is_fatal() {
        let platform = InMemoryPlatform::new();
        platform.fail_on("list_repos openeuler", 1).await;

        let err = Registry::load_from_platform(&platform, "openeuler").await.unwrap_err();
        assert!(matches!(err, Error::Platform { ref operation, .. } if operation == "list_repos"));
    }
}

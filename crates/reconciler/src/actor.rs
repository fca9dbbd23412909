//! Per-repository owner of observed state.

use std::future::Future;

use tokio::sync::Mutex;

use crate::types::ObservedState;

/// Exclusive owner of one repository's [`ObservedState`].
///
/// [`ResourceActor::update`] is the only way in. Transitions on one actor
/// never run concurrently: the lock is held for the whole transition,
/// including the platform calls it awaits.
#[derive(Debug)]
pub struct ResourceActor {
    name: String,
    state: Mutex<ObservedState>,
}

impl ResourceActor {
    /// Create an actor for a repository not (yet) seen on the platform.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_state(name, ObservedState::default())
    }

    /// Create an actor with a known starting state.
    pub fn with_state(name: impl Into<String>, state: ObservedState) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `transition` against the current state and commit the state it
    /// returns.
    ///
    /// On `Err` nothing is committed and the previous state stays in place.
    pub async fn update<F, Fut, R, E>(&self, transition: F) -> Result<R, E>
    where
        F: FnOnce(ObservedState) -> Fut,
        Fut: Future<Output = Result<(ObservedState, R), E>>,
    {
        let mut state = self.state.lock().await;
        let (next, output) = transition(state.clone()).await?;
        *state = next;
        Ok(output)
    }

    /// A copy of the committed state, taken under the same exclusion as
    /// [`ResourceActor::update`].
    #[cfg(test)]
    pub(crate) async fn snapshot(&self) -> ObservedState {
        self.state.lock().await.clone()
    }
}

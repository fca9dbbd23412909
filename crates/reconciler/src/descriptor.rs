//! OBS meta project descriptor written when a repository is created.

use std::sync::Arc;

use tracing::debug;
use watcher_core::{ObsMetaProject, ProjectTemplate};
use watcher_platform::PlatformClient;

use crate::error::{Error, Result};

/// Renders the project descriptor and commits it to the OBS meta repository.
pub struct DescriptorPublisher {
    client: Arc<dyn PlatformClient>,
    target: ObsMetaProject,
    template: ProjectTemplate,
}

impl DescriptorPublisher {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        target: ObsMetaProject,
        template: ProjectTemplate,
    ) -> Self {
        Self {
            client,
            target,
            template,
        }
    }

    /// Where the descriptor of `project` lands in the meta repository.
    pub fn path(&self, project: &str) -> String {
        self.target.project_file_path(project)
    }

    /// Render and commit the descriptor for `project`.
    ///
    /// # Errors
    ///
    /// Returns a platform error if the commit fails.
    pub async fn publish(&self, project: &str) -> Result<()> {
        let path = self.path(project);
        let content = self.template.render(project);
        let message = format!("add project {project}");
        let obs = &self.target.branch;

        self.client
            .create_file(&obs.org, &obs.repo, &obs.branch, &path, &content, &message)
            .await
            .map_err(|e| Error::platform("create_file", e))?;

        debug!(project, path = %path, "Published project descriptor");
        Ok(())
    }
}

//! The platform collaborator trait and its Gitee implementation.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use watcher_core::Permission;

use crate::config::GiteeConfig;
use crate::error::{Error, Result};
use crate::types::{Branch, CreateRepoParams, RepoInfo, RepoPatch, ReviewerSettings};

const PAGE_SIZE: usize = 100;

/// Operations the watcher needs from the hosting platform.
///
/// Write operations must be safe to call redundantly: enabling protection
/// on an already protected branch, or adding an existing member, is a no-op
/// from the caller's point of view.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// List every repository of an organization.
    async fn list_repos(&self, org: &str) -> Result<Vec<RepoInfo>>;

    /// Read a text file at a ref.
    async fn get_path_content(&self, org: &str, repo: &str, path: &str, git_ref: &str)
    -> Result<String>;

    /// List every file path (recursively) at a ref.
    async fn get_directory_tree(&self, org: &str, repo: &str, git_ref: &str) -> Result<Vec<String>>;

    async fn list_branches(&self, org: &str, repo: &str) -> Result<Vec<Branch>>;

    async fn get_repo(&self, org: &str, repo: &str) -> Result<RepoInfo>;

    async fn create_branch(&self, org: &str, repo: &str, branch: &str, parent: &str) -> Result<()>;

    async fn set_branch_protection(&self, org: &str, repo: &str, branch: &str) -> Result<()>;

    async fn cancel_branch_protection(&self, org: &str, repo: &str, branch: &str) -> Result<()>;

    async fn add_member(
        &self,
        org: &str,
        repo: &str,
        login: &str,
        permission: Permission,
    ) -> Result<()>;

    async fn remove_member(&self, org: &str, repo: &str, login: &str) -> Result<()>;

    async fn create_repo(&self, org: &str, params: &CreateRepoParams) -> Result<()>;

    async fn set_repo_reviewer(
        &self,
        org: &str,
        repo: &str,
        reviewer: &ReviewerSettings,
    ) -> Result<()>;

    async fn update_repo(&self, org: &str, repo: &str, patch: &RepoPatch) -> Result<()>;

    /// Commit a new file on a branch.
    async fn create_file(
        &self,
        org: &str,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<()>;
}

/// Client for the Gitee v5 REST API.
///
/// No retries happen at this layer: a failed call surfaces to the
/// reconciler, which re-attempts the correction on the next cycle.
#[derive(Debug, Clone)]
pub struct GiteeClient {
    config: Arc<GiteeConfig>,
    http_client: reqwest::Client,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GiteeClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: GiteeConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("repo-watcher/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            http_client,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::config_error("base URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .query(&[("access_token", self.config.token.as_str())])
    }

    async fn send(operation: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(operation, status = status.as_u16(), "Platform call");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::not_found(format!("{operation}: {body}")));
        }
        Err(Error::request_failed(operation, status.as_u16(), body))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = Self::send(operation, self.request(Method::GET, url).query(query)).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write<B: serde::Serialize + Sync>(
        &self,
        operation: &str,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<()> {
        let request = self.request(method, url);
        let request = match body {
            Some(body) => request.json(body),
            None => request,
        };
        Self::send(operation, request).await.map(|_| ())
    }
}

#[async_trait]
impl PlatformClient for GiteeClient {
    async fn list_repos(&self, org: &str) -> Result<Vec<RepoInfo>> {
        let url = self.url(&["orgs", org, "repos"])?;
        let mut repos = Vec::new();

        for page in 1usize.. {
            let batch: Vec<RepoInfo> = self
                .get_json(
                    "list_repos",
                    url.clone(),
                    &[
                        ("page", page.to_string()),
                        ("per_page", PAGE_SIZE.to_string()),
                    ],
                )
                .await?;
            let done = batch.len() < PAGE_SIZE;
            repos.extend(batch);
            if done {
                break;
            }
        }

        Ok(repos)
    }

    async fn get_path_content(
        &self,
        org: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<String> {
        let mut segments = vec!["repos", org, repo, "contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let url = self.url(&segments)?;

        let content: ContentResponse = self
            .get_json("get_path_content", url, &[("ref", git_ref.to_string())])
            .await
            .map_err(|e| match e {
                Error::Json(_) => Error::invalid_response(format!("'{path}' is not a file")),
                other => other,
            })?;

        if !content.encoding.is_empty() && content.encoding != "base64" {
            return Err(Error::invalid_response(format!(
                "unsupported encoding '{}' for '{path}'",
                content.encoding
            )));
        }

        let compact: String = content.content.split_whitespace().collect();
        let bytes = STANDARD
            .decode(compact)
            .map_err(|e| Error::invalid_response(format!("decode '{path}': {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| Error::invalid_response(format!("'{path}' is not UTF-8: {e}")))
    }

    async fn get_directory_tree(&self, org: &str, repo: &str, git_ref: &str) -> Result<Vec<String>> {
        let url = self.url(&["repos", org, repo, "git", "trees", git_ref])?;
        let tree: TreeResponse = self
            .get_json("get_directory_tree", url, &[("recursive", "1".to_string())])
            .await?;

        Ok(tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| entry.path)
            .collect())
    }

    async fn list_branches(&self, org: &str, repo: &str) -> Result<Vec<Branch>> {
        let url = self.url(&["repos", org, repo, "branches"])?;
        self.get_json("list_branches", url, &[]).await
    }

    async fn get_repo(&self, org: &str, repo: &str) -> Result<RepoInfo> {
        let url = self.url(&["repos", org, repo])?;
        self.get_json("get_repo", url, &[]).await
    }

    async fn create_branch(&self, org: &str, repo: &str, branch: &str, parent: &str) -> Result<()> {
        let url = self.url(&["repos", org, repo, "branches"])?;
        let body = serde_json::json!({ "refs": parent, "branch_name": branch });
        self.write("create_branch", Method::POST, url, Some(&body)).await
    }

    async fn set_branch_protection(&self, org: &str, repo: &str, branch: &str) -> Result<()> {
        let url = self.url(&["repos", org, repo, "branches", branch, "protection"])?;
        self.write::<()>("set_branch_protection", Method::PUT, url, None)
            .await
    }

    async fn cancel_branch_protection(&self, org: &str, repo: &str, branch: &str) -> Result<()> {
        let url = self.url(&["repos", org, repo, "branches", branch, "protection"])?;
        self.write::<()>("cancel_branch_protection", Method::DELETE, url, None)
            .await
    }

    async fn add_member(
        &self,
        org: &str,
        repo: &str,
        login: &str,
        permission: Permission,
    ) -> Result<()> {
        let url = self.url(&["repos", org, repo, "collaborators", login])?;
        let body = serde_json::json!({ "permission": permission.as_str() });
        self.write("add_member", Method::PUT, url, Some(&body)).await
    }

    async fn remove_member(&self, org: &str, repo: &str, login: &str) -> Result<()> {
        let url = self.url(&["repos", org, repo, "collaborators", login])?;
        self.write::<()>("remove_member", Method::DELETE, url, None)
            .await
    }

    async fn create_repo(&self, org: &str, params: &CreateRepoParams) -> Result<()> {
        let url = self.url(&["orgs", org, "repos"])?;
        self.write("create_repo", Method::POST, url, Some(params))
            .await
    }

    async fn set_repo_reviewer(
        &self,
        org: &str,
        repo: &str,
        reviewer: &ReviewerSettings,
    ) -> Result<()> {
        let url = self.url(&["repos", org, repo, "reviewer"])?;
        self.write("set_repo_reviewer", Method::PUT, url, Some(reviewer))
            .await
    }

    async fn update_repo(&self, org: &str, repo: &str, patch: &RepoPatch) -> Result<()> {
        let url = self.url(&["repos", org, repo])?;
        self.write("update_repo", Method::PATCH, url, Some(patch))
            .await
    }

    async fn create_file(
        &self,
        org: &str,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<()> {
        let mut segments = vec!["repos", org, repo, "contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let url = self.url(&segments)?;
        let body = serde_json::json!({
            "content": STANDARD.encode(content),
            "message": message,
            "branch": branch,
        });
        self.write("create_file", Method::POST, url, Some(&body))
            .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::arithmetic_side_effects)]

    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> std::result::Result<GiteeClient, Box<dyn std::error::Error>> {
        let config = GiteeConfig::new(&format!("{}/api/v5", server.uri()), "tok")?;
        Ok(GiteeClient::new(config)?)
    }

    #[tokio::test]
    async fn test_list_repos_follows_pages() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;

        let full_page: Vec<_> = (0..PAGE_SIZE)
            .map(|i| serde_json::json!({ "path": format!("repo-{i}") }))
            .collect();

        Mock::given(method("GET"))
            .and(path("/api/v5/orgs/openeuler/repos"))
            .and(query_param("page", "1"))
            .and(query_param("access_token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(full_page))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v5/orgs/openeuler/repos"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "path": "last", "description": "the last one", "members": ["alice"] }
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let repos = client.list_repos("openeuler").await?;

        assert_eq!(repos.len(), PAGE_SIZE + 1);
        assert_eq!(repos.last().map(|r| r.name.as_str()), Some("last"));
        assert_eq!(
            repos.last().map(|r| r.members.clone()),
            Some(vec!["alice".to_string()])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_get_path_content_decodes_base64() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        let encoded = STANDARD.encode("community: openeuler\n");

        Mock::given(method("GET"))
            .and(path("/api/v5/repos/openeuler/community/contents/repository/openeuler.yaml"))
            .and(query_param("ref", "master"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "type": "file",
                "encoding": "base64",
                "content": format!("{}\n", encoded),
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let text = client
            .get_path_content("openeuler", "community", "repository/openeuler.yaml", "master")
            .await?;

        assert_eq!(text, "community: openeuler\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_tree_keeps_only_blobs() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v5/repos/openeuler/community/git/trees/master"))
            .and(query_param("recursive", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tree": [
                    { "path": "sig", "type": "tree" },
                    { "path": "sig/infra/OWNERS", "type": "blob" },
                    { "path": "sig/sigs.yaml", "type": "blob" }
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let files = client
            .get_directory_tree("openeuler", "community", "master")
            .await?;

        assert_eq!(files, vec!["sig/infra/OWNERS", "sig/sigs.yaml"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_member_sends_permission() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/v5/repos/openeuler/alpha/collaborators/alice"))
            .and(body_json(serde_json::json!({ "permission": "push" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        client
            .add_member("openeuler", "alpha", "alice", Permission::Push)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_is_reported() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/v5/repos/openeuler/alpha/branches/release/protection"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let result = client
            .set_branch_protection("openeuler", "alpha", "release")
            .await;

        match result {
            Err(e @ Error::RequestFailed { status: 503, .. }) => assert!(e.is_transient()),
            other => return Err(format!("unexpected result: {other:?}").into()),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_repo_is_not_found() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v5/repos/openeuler/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found Project"))
            .mount(&server)
            .await;

        let client = client_for(&server).await?;
        let result = client.get_repo("openeuler", "ghost").await;

        assert!(matches!(result, Err(Error::NotFound { .. })));
        Ok(())
    }
}

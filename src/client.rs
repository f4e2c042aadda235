//! OneDev REST API boundary
//!
//! Everything the discovery pipeline and the provisioner need from a OneDev
//! instance is expressed by the [`OneDevApi`] trait; [`OneDevClient`] is the
//! HTTP implementation over the instance's `~api` endpoints. Each call is a
//! single synchronous request/response that either succeeds or fails; retry
//! and backoff are not handled at this layer.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Credentials;

#[cfg(test)]
pub mod mock;

/// Page size for project queries
pub const PAGE_SIZE: usize = 100;

/// Query-string helpers for the OneDev search DSL.
///
/// The grammar belongs to the remote backend; these helpers only format it
/// and never attempt to parse or validate it.
pub mod query {
    pub fn owned_by(user: &str) -> String {
        format!("owned by \"{}\"", user)
    }

    pub fn children_of(org: &str) -> String {
        format!("children of \"{}\"", org)
    }

    pub fn name_is(name: &str) -> String {
        format!("\"Name\" is \"{}\"", name)
    }

    pub fn name_under(name: &str, parent: &str) -> String {
        format!("\"Name\" is \"{}\" and children of \"{}\"", name, parent)
    }

    pub fn branch(name: &str) -> String {
        format!("branch({})", name)
    }
}

/// A OneDev user account
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: i64,
    pub name: String,
}

/// A OneDev project. Projects live in a hierarchical namespace; a non-zero
/// `forked_from_id` marks the project as a fork.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub forked_from_id: i64,
    pub description: Option<String>,
}

/// Clone URLs of a project
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CloneUrls {
    #[serde(rename = "HTTP")]
    pub http: String,
    #[serde(rename = "SSH")]
    pub ssh: String,
}

/// A commit, reduced to the author timestamp the activity filter needs
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Commit {
    pub author: Signature,
}

/// Author identity on a commit; `when` is a microsecond epoch timestamp
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Signature {
    pub name: String,
    pub when: i64,
}

/// Links a user to a group
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Membership {
    pub id: i64,
    pub user_id: i64,
    pub group_id: i64,
}

/// A OneDev group (organization)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<i64>,
    code_management: bool,
}

/// Remote capability required from a OneDev instance
///
/// Implemented by [`OneDevClient`] for real instances and by a mock in tests.
/// Every method can fail per call; the caller decides which failures are
/// fatal and which degrade gracefully.
#[async_trait]
pub trait OneDevApi: Send + Sync {
    /// Resolve the authenticated user
    async fn who_am_i(&self) -> Result<User>;

    /// Search projects with an opaque backend query (see [`query`])
    async fn list_projects(&self, query: &str, offset: usize, count: usize)
        -> Result<Vec<Project>>;

    /// Fetch the HTTP and SSH clone URLs of a project
    async fn clone_urls(&self, project_id: i64) -> Result<CloneUrls>;

    /// Fetch the default branch name of a project
    async fn default_branch(&self, project_id: i64) -> Result<String>;

    /// List commit hashes matching a commit query, most recent first
    async fn list_commits(&self, project_id: i64, query: &str) -> Result<Vec<String>>;

    /// Fetch one commit by hash
    async fn get_commit(&self, project_id: i64, commit_id: &str) -> Result<Commit>;

    /// List the group memberships of a user
    async fn memberships(&self, user_id: i64) -> Result<Vec<Membership>>;

    /// Fetch one group by id
    async fn group(&self, group_id: i64) -> Result<Group>;

    /// Create a project under a parent namespace (0 means root), returning
    /// the new project id
    async fn create_project(
        &self,
        name: &str,
        parent_id: i64,
        code_management: bool,
    ) -> Result<i64>;
}

/// Builds an API client for a base URL and authentication mode.
///
/// The pipeline and the provisioner go through this seam so tests can inject
/// a mock instance.
pub type Connector = Box<dyn Fn(&str, Auth) -> Result<Arc<dyn OneDevApi>> + Send + Sync>;

/// Connector backed by [`OneDevClient`]
pub fn http_connector() -> Connector {
    Box::new(|url, auth| {
        let client: Arc<dyn OneDevApi> = Arc::new(OneDevClient::new(url, auth)?);
        Ok(client)
    })
}

/// Authentication mode for one OneDev instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// Bearer token
    Token(String),
    /// Username and password
    Basic { username: String, password: String },
    /// No credentials; only publicly visible projects
    Anonymous,
}

impl Auth {
    /// Select the authentication mode for a credential set, in priority
    /// order: token (or token file) > basic auth > anonymous. Always resolves
    /// to exactly one mode; only an unreadable token file is an error.
    pub fn select(creds: &Credentials) -> Result<Self> {
        if let Some(token) = creds.resolve_token()? {
            return Ok(Auth::Token(token));
        }

        if !creds.password.is_empty() {
            return Ok(Auth::Basic {
                username: creds.username.clone(),
                password: creds.password.clone(),
            });
        }

        Ok(Auth::Anonymous)
    }
}

/// HTTP implementation of [`OneDevApi`]
pub struct OneDevClient {
    http: HttpClient,
    base_url: String,
    auth: Auth,
}

impl OneDevClient {
    /// Create a new client for one instance
    pub fn new(base_url: &str, auth: Auth) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/~api/{}", self.base_url, path);
        let builder = self.http.request(method, url);

        match &self.auth {
            Auth::Token(token) => builder.bearer_auth(token),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::Anonymous => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder.send().await.context("OneDev API request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("OneDev API returned {}", status));
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<T> {
        self.send(builder)
            .await?
            .json()
            .await
            .context("Failed to decode OneDev API response")
    }
}

#[async_trait]
impl OneDevApi for OneDevClient {
    async fn who_am_i(&self) -> Result<User> {
        self.get_json(self.request(reqwest::Method::GET, "users/me"))
            .await
    }

    async fn list_projects(
        &self,
        query: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<Project>> {
        let builder = self.request(reqwest::Method::GET, "projects").query(&[
            ("query", query),
            ("offset", &offset.to_string()),
            ("count", &count.to_string()),
        ]);
        self.get_json(builder).await
    }

    async fn clone_urls(&self, project_id: i64) -> Result<CloneUrls> {
        let path = format!("projects/{}/clone-url", project_id);
        self.get_json(self.request(reqwest::Method::GET, &path)).await
    }

    async fn default_branch(&self, project_id: i64) -> Result<String> {
        let path = format!("projects/{}/default-branch", project_id);
        let body = self
            .send(self.request(reqwest::Method::GET, &path))
            .await?
            .text()
            .await
            .context("Failed to read OneDev API response")?;

        // The endpoint answers with a bare (possibly JSON-quoted) branch name
        let branch = body.trim().trim_matches('"').to_string();
        if branch.is_empty() {
            return Err(anyhow!("project {} has no default branch", project_id));
        }
        Ok(branch)
    }

    async fn list_commits(&self, project_id: i64, query: &str) -> Result<Vec<String>> {
        let path = format!("repositories/{}/commits", project_id);
        let builder = self
            .request(reqwest::Method::GET, &path)
            .query(&[("query", query)]);
        self.get_json(builder).await
    }

    async fn get_commit(&self, project_id: i64, commit_id: &str) -> Result<Commit> {
        let path = format!("repositories/{}/commits/{}", project_id, commit_id);
        self.get_json(self.request(reqwest::Method::GET, &path)).await
    }

    async fn memberships(&self, user_id: i64) -> Result<Vec<Membership>> {
        let path = format!("users/{}/memberships", user_id);
        self.get_json(self.request(reqwest::Method::GET, &path)).await
    }

    async fn group(&self, group_id: i64) -> Result<Group> {
        let path = format!("groups/{}", group_id);
        self.get_json(self.request(reqwest::Method::GET, &path)).await
    }

    async fn create_project(
        &self,
        name: &str,
        parent_id: i64,
        code_management: bool,
    ) -> Result<i64> {
        let body = CreateProjectBody {
            name,
            parent_id: (parent_id != 0).then_some(parent_id),
            code_management,
        };
        let builder = self.request(reqwest::Method::POST, "projects").json(&body);
        self.get_json(builder).await
    }
}

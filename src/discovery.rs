//! Repository discovery pipeline
//!
//! Runs once per configured source: authenticates, enumerates the user's own
//! projects, applies the filter pipeline, then expands group memberships into
//! include-organizations and enumerates each organization's child projects.
//! Produces a flat, insertion-ordered list of [`RepoSpec`] descriptors for
//! the orchestrator.
//!
//! Error policy: identity resolution failure aborts the current source entry
//! only; every per-project lookup failure is logged and degrades that one
//! project (skip, or fall back to a default) without aborting the run.

use chrono::{Duration, Utc};
use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::client::{http_connector, query, CloneUrls, Connector, OneDevApi, Project, PAGE_SIZE};
use crate::config::{SourceConfig, DEFAULT_URL};

/// One discovered repository, ready to be mirrored
///
/// Immutable once produced; ownership passes to the caller.
#[derive(Debug, Clone)]
pub struct RepoSpec {
    /// Repository name
    pub name: String,

    /// HTTP clone URL
    pub clone_url: String,

    /// SSH clone URL
    pub ssh_url: String,

    /// Auth token carried along for the clone transport
    pub token: Option<String>,

    /// Default branch name
    pub default_branch: String,

    /// Owning user or organization name
    pub owner: String,

    /// Host part of the source instance URL (for display/logging)
    pub hoster: String,

    /// Human description of the project
    pub description: String,

    /// The source configuration this repository was discovered from
    pub origin: SourceConfig,
}

impl RepoSpec {
    /// Get display name (owner/name format)
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// The discovery pipeline over a set of configured sources
pub struct OneDevDiscovery {
    sources: Vec<SourceConfig>,
    connect: Connector,
}

impl OneDevDiscovery {
    /// Create a pipeline backed by the HTTP client
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self::with_connector(sources, http_connector())
    }

    /// Create a pipeline with a custom client connector (used by tests)
    pub fn with_connector(sources: Vec<SourceConfig>, connect: Connector) -> Self {
        Self { sources, connect }
    }

    /// Discover repositories from every configured source.
    ///
    /// The boolean is true iff at least one source entry was processed, so
    /// the orchestrator can tell "nothing configured" from "configured but
    /// empty".
    pub async fn discover(&self) -> (Vec<RepoSpec>, bool) {
        let mut repos = Vec::new();
        let mut attempted = false;

        for source in &self.sources {
            attempted = true;

            let mut source = source.clone();
            if source.url.is_empty() {
                source.url = DEFAULT_URL.to_string();
            }

            if let Err(err) = self.discover_source(&mut source, &mut repos).await {
                error!(url = %source.url, "skipping source: {:#}", err);
            }
        }

        (repos, attempted)
    }

    /// Run the pipeline for one source entry. An error here aborts this
    /// entry only.
    async fn discover_source(
        &self,
        source: &mut SourceConfig,
        repos: &mut Vec<RepoSpec>,
    ) -> anyhow::Result<()> {
        let max_age = source.filter.last_activity_duration().unwrap_or_else(|err| {
            error!(url = %source.url, "ignoring last_activity filter: {:#}", err);
            Duration::zero()
        });

        let include: HashSet<String> = source.include.iter().cloned().collect();
        let exclude: HashSet<String> = source.exclude.iter().cloned().collect();
        let exclude_orgs: HashSet<String> = source.exclude_orgs.iter().cloned().collect();

        let auth = crate::client::Auth::select(&source.creds)?;
        let uses_basic_auth = !source.creds.username.is_empty()
            && !source.creds.effective_password().is_empty();
        let client = (self.connect)(&source.url, auth)?;

        // Identity is a hard dependency for query scoping
        let mut me = None;
        if source.user.is_empty() {
            let user = client
                .who_am_i()
                .await
                .map_err(|err| err.context("can't resolve current user"))?;
            source.user = user.name.clone();
            me = Some(user);
        }

        info!(url = %source.url, "grabbing repositories from {}", source.user);

        let hoster = host_of(&source.url);

        for project in
            list_all_projects(client.as_ref(), &query::owned_by(&source.user), &source.url).await
        {
            if source.filter.exclude_forks && project.forked_from_id != 0 {
                continue;
            }
            if !include.is_empty() {
                if !include.contains(&project.name) {
                    continue;
                }
                if exclude.contains(&project.name) {
                    continue;
                }
            }

            let Some(urls) = fetch_clone_urls(client.as_ref(), &project, &source.url).await else {
                continue;
            };
            let default_branch =
                default_branch_or_fallback(client.as_ref(), &project, &source.url).await;

            if is_stale(client.as_ref(), &project, &default_branch, max_age, &source.url).await {
                continue;
            }

            repos.push(make_spec(
                &project,
                urls,
                default_branch,
                source.user.clone(),
                &hoster,
                source,
            ));
        }

        // Memberships can only be walked for the user we authenticated as
        if uses_basic_auth && source.include_orgs.is_empty() {
            if let Some(user) = &me {
                expand_orgs(client.as_ref(), user, &exclude_orgs, source).await;
            }
        }

        for org in source.include_orgs.clone() {
            for project in
                list_all_projects(client.as_ref(), &query::children_of(&org), &source.url).await
            {
                if source.filter.exclude_forks && project.forked_from_id != 0 {
                    continue;
                }

                let Some(urls) = fetch_clone_urls(client.as_ref(), &project, &source.url).await
                else {
                    continue;
                };
                let default_branch =
                    default_branch_or_fallback(client.as_ref(), &project, &source.url).await;

                repos.push(make_spec(
                    &project,
                    urls,
                    default_branch,
                    org.clone(),
                    &hoster,
                    source,
                ));
            }
        }

        Ok(())
    }
}

fn make_spec(
    project: &Project,
    urls: CloneUrls,
    default_branch: String,
    owner: String,
    hoster: &str,
    source: &SourceConfig,
) -> RepoSpec {
    RepoSpec {
        name: project.name.clone(),
        clone_url: urls.http,
        ssh_url: urls.ssh,
        token: (!source.creds.token.is_empty()).then(|| source.creds.token.clone()),
        default_branch,
        owner,
        hoster: hoster.to_string(),
        description: project.description.clone().unwrap_or_default(),
        origin: source.clone(),
    }
}

/// Fetch every page of a project query. A failed page is logged and ends the
/// listing; the pipeline continues with whatever was already fetched.
async fn list_all_projects(client: &dyn OneDevApi, query: &str, url: &str) -> Vec<Project> {
    let mut projects = Vec::new();
    let mut offset = 0;

    loop {
        match client.list_projects(query, offset, PAGE_SIZE).await {
            Ok(page) => {
                let fetched = page.len();
                projects.extend(page);
                if fetched < PAGE_SIZE {
                    break;
                }
                offset += fetched;
            }
            Err(err) => {
                error!(url = %url, query = %query, "project query failed: {:#}", err);
                break;
            }
        }
    }

    projects
}

/// Clone-URL enrichment; an error skips this one project
async fn fetch_clone_urls(
    client: &dyn OneDevApi,
    project: &Project,
    url: &str,
) -> Option<CloneUrls> {
    match client.clone_urls(project.id).await {
        Ok(urls) => Some(urls),
        Err(err) => {
            error!(url = %url, project = %project.name, "couldn't get clone urls: {:#}", err);
            None
        }
    }
}

/// Default-branch enrichment; an error falls back to `main`
async fn default_branch_or_fallback(
    client: &dyn OneDevApi,
    project: &Project,
    url: &str,
) -> String {
    match client.default_branch(project.id).await {
        Ok(branch) => branch,
        Err(err) => {
            warn!(
                url = %url,
                project = %project.name,
                "couldn't get default branch, falling back to main: {:#}", err
            );
            "main".to_string()
        }
    }
}

/// Last-activity check against the latest default-branch commit. Fail-open:
/// a project is only considered stale when the filter is on and the latest
/// commit could actually be resolved and is too old.
async fn is_stale(
    client: &dyn OneDevApi,
    project: &Project,
    branch: &str,
    max_age: Duration,
    url: &str,
) -> bool {
    if max_age.is_zero() {
        return false;
    }

    let commits = match client.list_commits(project.id, &query::branch(branch)).await {
        Ok(commits) => commits,
        Err(err) => {
            warn!(url = %url, project = %project.name, "couldn't list commits: {:#}", err);
            return false;
        }
    };
    let Some(head) = commits.first() else {
        return false;
    };

    let commit = match client.get_commit(project.id, head).await {
        Ok(commit) => commit,
        Err(err) => {
            warn!(
                url = %url,
                project = %project.name,
                "can't get latest commit on {}: {:#}", branch, err
            );
            return false;
        }
    };

    match chrono::DateTime::from_timestamp_micros(commit.author.when) {
        Some(last_active) => Utc::now() - last_active > max_age,
        None => false,
    }
}

/// Resolve group memberships into include-organizations. Failed lookups are
/// logged and that membership is skipped.
async fn expand_orgs(
    client: &dyn OneDevApi,
    user: &crate::client::User,
    exclude_orgs: &HashSet<String>,
    source: &mut SourceConfig,
) {
    let memberships = match client.memberships(user.id).await {
        Ok(memberships) => memberships,
        Err(err) => {
            warn!(
                url = %source.url,
                "couldn't get memberships for {}: {:#}", user.name, err
            );
            return;
        }
    };

    for membership in memberships {
        match client.group(membership.group_id).await {
            Ok(group) => {
                if !exclude_orgs.contains(&group.name) {
                    source.include_orgs.push(group.name);
                }
            }
            Err(err) => {
                warn!(
                    url = %source.url,
                    "couldn't get group with id {}: {:#}", membership.group_id, err
                );
            }
        }
    }
}

/// Host part of an instance URL, used as the hoster identifier
fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.trim_end_matches('/').to_string())
}

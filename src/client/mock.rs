//! Mock OneDev API client for testing
//!
//! Builder-configured implementation of [`OneDevApi`] so the discovery
//! pipeline and the provisioner can be exercised without a real instance.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{query, CloneUrls, Commit, Group, Membership, OneDevApi, Project, Signature, User};

/// Mock API client. Configure responses via the builder methods, then hand it
/// to a pipeline through a test connector.
#[derive(Default)]
pub struct MockOneDev {
    /// Authenticated user; `None` makes `who_am_i` fail
    me: Option<User>,
    /// Projects returned per exact query string
    projects: Mutex<HashMap<String, Vec<Project>>>,
    clone_urls: Mutex<HashMap<i64, CloneUrls>>,
    /// Projects whose clone-URL lookup fails
    broken_clone_urls: HashSet<i64>,
    default_branches: HashMap<i64, String>,
    commits: HashMap<i64, Vec<String>>,
    commit_details: HashMap<(i64, String), Commit>,
    memberships: HashMap<i64, Vec<Membership>>,
    groups: HashMap<i64, Group>,
    /// Recorded create_project calls: (name, parent_id, code_management)
    created: Mutex<Vec<(String, i64, bool)>>,
    next_project_id: Mutex<i64>,
    membership_calls: AtomicUsize,
}

impl MockOneDev {
    pub fn new() -> Self {
        Self {
            next_project_id: Mutex::new(1000),
            ..Default::default()
        }
    }

    pub fn with_me(mut self, id: i64, name: &str) -> Self {
        self.me = Some(User {
            id,
            name: name.to_string(),
        });
        self
    }

    pub fn with_projects(self, query: &str, projects: Vec<Project>) -> Self {
        self.projects
            .lock()
            .unwrap()
            .insert(query.to_string(), projects);
        self
    }

    pub fn with_clone_urls(self, project_id: i64, http: &str, ssh: &str) -> Self {
        self.clone_urls.lock().unwrap().insert(
            project_id,
            CloneUrls {
                http: http.to_string(),
                ssh: ssh.to_string(),
            },
        );
        self
    }

    pub fn with_broken_clone_urls(mut self, project_id: i64) -> Self {
        self.broken_clone_urls.insert(project_id);
        self
    }

    pub fn with_default_branch(mut self, project_id: i64, branch: &str) -> Self {
        self.default_branches
            .insert(project_id, branch.to_string());
        self
    }

    pub fn with_commits(mut self, project_id: i64, hashes: Vec<&str>) -> Self {
        self.commits
            .insert(project_id, hashes.iter().map(|h| h.to_string()).collect());
        self
    }

    pub fn with_commit(mut self, project_id: i64, hash: &str, when_micros: i64) -> Self {
        self.commit_details.insert(
            (project_id, hash.to_string()),
            Commit {
                author: Signature {
                    name: "author".to_string(),
                    when: when_micros,
                },
            },
        );
        self
    }

    pub fn with_membership(mut self, user_id: i64, group_id: i64) -> Self {
        let entry = self.memberships.entry(user_id).or_default();
        entry.push(Membership {
            id: entry.len() as i64 + 1,
            user_id,
            group_id,
        });
        self
    }

    pub fn with_group(mut self, group_id: i64, name: &str) -> Self {
        self.groups.insert(
            group_id,
            Group {
                id: group_id,
                name: name.to_string(),
            },
        );
        self
    }

    /// Recorded create_project calls
    pub fn created(&self) -> Vec<(String, i64, bool)> {
        self.created.lock().unwrap().clone()
    }

    /// Number of membership lookups performed
    pub fn membership_calls(&self) -> usize {
        self.membership_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OneDevApi for MockOneDev {
    async fn who_am_i(&self) -> Result<User> {
        self.me.clone().ok_or_else(|| anyhow!("unauthenticated"))
    }

    async fn list_projects(
        &self,
        query: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<Project>> {
        let projects = self.projects.lock().unwrap();
        let all = projects.get(query).cloned().unwrap_or_default();
        Ok(all.into_iter().skip(offset).take(count).collect())
    }

    async fn clone_urls(&self, project_id: i64) -> Result<CloneUrls> {
        if self.broken_clone_urls.contains(&project_id) {
            return Err(anyhow!("clone urls unavailable for {}", project_id));
        }
        self.clone_urls
            .lock()
            .unwrap()
            .get(&project_id)
            .cloned()
            .ok_or_else(|| anyhow!("no clone urls for {}", project_id))
    }

    async fn default_branch(&self, project_id: i64) -> Result<String> {
        self.default_branches
            .get(&project_id)
            .cloned()
            .ok_or_else(|| anyhow!("no default branch for {}", project_id))
    }

    async fn list_commits(&self, project_id: i64, _query: &str) -> Result<Vec<String>> {
        Ok(self.commits.get(&project_id).cloned().unwrap_or_default())
    }

    async fn get_commit(&self, project_id: i64, commit_id: &str) -> Result<Commit> {
        self.commit_details
            .get(&(project_id, commit_id.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("no commit {} in project {}", commit_id, project_id))
    }

    async fn memberships(&self, user_id: i64) -> Result<Vec<Membership>> {
        self.membership_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.memberships.get(&user_id).cloned().unwrap_or_default())
    }

    async fn group(&self, group_id: i64) -> Result<Group> {
        self.groups
            .get(&group_id)
            .cloned()
            .ok_or_else(|| anyhow!("no group {}", group_id))
    }

    async fn create_project(
        &self,
        name: &str,
        parent_id: i64,
        code_management: bool,
    ) -> Result<i64> {
        self.created
            .lock()
            .unwrap()
            .push((name.to_string(), parent_id, code_management));

        let id = {
            let mut next = self.next_project_id.lock().unwrap();
            *next += 1;
            *next
        };

        // Register the new project so later locate calls find it, like the
        // real backend would
        let project = Project {
            id,
            name: name.to_string(),
            forked_from_id: 0,
            description: None,
        };
        if let Some(me) = &self.me {
            self.projects
                .lock()
                .unwrap()
                .entry(query::name_under(name, &me.name))
                .or_default()
                .push(project);
        }
        self.clone_urls.lock().unwrap().insert(
            id,
            CloneUrls {
                http: format!("https://mock.onedev.test/{}", name),
                ssh: format!("ssh://git@mock.onedev.test/{}", name),
            },
        );

        Ok(id)
    }
}

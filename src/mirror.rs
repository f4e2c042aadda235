//! Destination provisioner
//!
//! Locate-or-create of a mirror project on a destination instance. Repeated
//! calls for the same repository converge on the same project, so the
//! orchestrator can re-run without creating duplicates. Unlike discovery,
//! every remote failure here is a hard error returned to the caller.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::client::{http_connector, query, Auth, Connector, PAGE_SIZE};
use crate::config::{DestinationConfig, DEFAULT_URL};
use crate::discovery::RepoSpec;

/// Provisions mirror projects on destination instances
pub struct MirrorProvisioner {
    connect: Connector,
}

impl MirrorProvisioner {
    /// Create a provisioner backed by the HTTP client
    pub fn new() -> Self {
        Self::with_connector(http_connector())
    }

    /// Create a provisioner with a custom client connector (used by tests)
    pub fn with_connector(connect: Connector) -> Self {
        Self { connect }
    }

    /// Locate the destination project for a repository, creating it under
    /// the authenticated user's namespace if absent, and return its HTTP
    /// clone URL.
    pub async fn provision(&self, dest: &DestinationConfig, repo: &RepoSpec) -> Result<String> {
        let url = if dest.url.is_empty() {
            DEFAULT_URL
        } else {
            &dest.url
        };

        let auth = Auth::select(&dest.creds)?;
        let client = (self.connect)(url, auth)?;

        let user = client
            .who_am_i()
            .await
            .context("can't resolve destination user")?;

        // Idempotence: an existing project with the exact name wins
        let existing = client
            .list_projects(&query::name_under(&repo.name, &user.name), 0, PAGE_SIZE)
            .await?;
        for project in existing {
            if project.name == repo.name {
                debug!(url = %url, project = %repo.name, "mirror project already exists");
                let urls = client.clone_urls(project.id).await?;
                return Ok(urls.http);
            }
        }

        // The namespace project named after the user; absent means root
        let mut parent_id = 0;
        for parent in client
            .list_projects(&query::name_is(&user.name), 0, PAGE_SIZE)
            .await?
        {
            if parent.name == user.name {
                parent_id = parent.id;
            }
        }

        let project_id = client
            .create_project(&repo.name, parent_id, true)
            .await
            .with_context(|| format!("failed to create mirror project {}", repo.name))?;

        info!(url = %url, project = %repo.name, "created mirror project");

        let urls = client.clone_urls(project_id).await?;
        Ok(urls.http)
    }
}

impl Default for MirrorProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockOneDev;
    use crate::client::{OneDevApi, Project};
    use std::sync::Arc;

    fn connector_for(mock: Arc<MockOneDev>) -> Connector {
        Box::new(move |_url, _auth| {
            let client: Arc<dyn OneDevApi> = mock.clone();
            Ok(client)
        })
    }

    fn repo(name: &str) -> RepoSpec {
        RepoSpec {
            name: name.to_string(),
            clone_url: format!("https://source/{}", name),
            ssh_url: format!("ssh://source/{}", name),
            token: None,
            default_branch: "main".to_string(),
            owner: "bob".to_string(),
            hoster: "source".to_string(),
            description: String::new(),
            origin: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_creates_under_user_namespace() {
        let mock = Arc::new(
            MockOneDev::new().with_me(1, "bob").with_projects(
                &query::name_is("bob"),
                vec![Project {
                    id: 7,
                    name: "bob".to_string(),
                    forked_from_id: 0,
                    description: None,
                }],
            ),
        );

        let provisioner = MirrorProvisioner::with_connector(connector_for(mock.clone()));
        let url = provisioner
            .provision(&DestinationConfig::default(), &repo("foo"))
            .await
            .unwrap();

        assert_eq!(url, "https://mock.onedev.test/foo");
        assert_eq!(mock.created(), vec![("foo".to_string(), 7, true)]);
    }

    #[tokio::test]
    async fn test_missing_namespace_defaults_to_root() {
        let mock = Arc::new(MockOneDev::new().with_me(1, "bob"));

        let provisioner = MirrorProvisioner::with_connector(connector_for(mock.clone()));
        provisioner
            .provision(&DestinationConfig::default(), &repo("foo"))
            .await
            .unwrap();

        assert_eq!(mock.created(), vec![("foo".to_string(), 0, true)]);
    }

    #[tokio::test]
    async fn test_existing_project_is_returned_without_create() {
        let mock = Arc::new(
            MockOneDev::new()
                .with_me(1, "bob")
                .with_projects(
                    &query::name_under("foo", "bob"),
                    vec![Project {
                        id: 12,
                        name: "foo".to_string(),
                        forked_from_id: 0,
                        description: None,
                    }],
                )
                .with_clone_urls(12, "https://dest/foo", "ssh://dest/foo"),
        );

        let provisioner = MirrorProvisioner::with_connector(connector_for(mock.clone()));
        let url = provisioner
            .provision(&DestinationConfig::default(), &repo("foo"))
            .await
            .unwrap();

        assert_eq!(url, "https://dest/foo");
        assert!(mock.created().is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_is_idempotent() {
        let mock = Arc::new(MockOneDev::new().with_me(1, "bob"));
        let provisioner = MirrorProvisioner::with_connector(connector_for(mock.clone()));
        let dest = DestinationConfig::default();

        let first = provisioner.provision(&dest, &repo("foo")).await.unwrap();
        let second = provisioner.provision(&dest, &repo("foo")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.created().len(), 1);
    }

    #[tokio::test]
    async fn test_identity_failure_is_hard_error() {
        let mock = Arc::new(MockOneDev::new());
        let provisioner = MirrorProvisioner::with_connector(connector_for(mock));

        let result = provisioner
            .provision(&DestinationConfig::default(), &repo("foo"))
            .await;

        assert!(result.is_err());
    }
}

//! OneDev Mirror - Repository backup connector for OneDev instances
//!
//! Discovers repositories hosted on a OneDev instance and provisions matching
//! projects on a destination instance, so that an orchestrating job runner can
//! mirror them.
//!
//! ## Core Features
//!
//! - **Repository Discovery**: Paginated project queries scoped to the
//!   authenticated (or configured) user, with per-project enrichment of clone
//!   URLs, default branch, and last-commit activity
//! - **Filtering**: Fork exclusion, include/exclude name sets, and
//!   last-activity duration filtering
//! - **Organization Expansion**: Walks group memberships to discover
//!   additional repositories by group ownership
//! - **Idempotent Provisioning**: Locate-or-create of destination projects
//!   under the authenticated user's namespace
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`client`]: OneDev REST API boundary and authentication
//! - [`discovery`]: The repository discovery pipeline
//! - [`mirror`]: The destination provisioner

pub mod client;
pub mod config;
pub mod discovery;
pub mod mirror;

pub use client::{Auth, OneDevApi, OneDevClient};
pub use config::{Config, Credentials, DestinationConfig, FilterSettings, SourceConfig};
pub use discovery::{OneDevDiscovery, RepoSpec};
pub use mirror::MirrorProvisioner;

//! # kc-directory
//!
//! RBAC directory aggregation and role assignment across Keycloak clusters.
//!
//! This crate keeps a lazily populated view of each cluster's client roles,
//! submits role assignments that touch realm and client scopes with
//! per-scope failure reporting, and fans queries out to many clusters while
//! isolating the ones that fail.
//!
//! ## Components
//!
//! - [`ClusterRegistry`] - known clusters, published as immutable snapshots
//! - [`DirectoryGateway`] - per-cluster admin API operations
//! - [`RoleCache`] - single-flight client role cache
//! - [`AssignmentCoordinator`] - parallel role assignment with partial failure
//! - [`FederatedSearch`] - cross-cluster search and health probing
//! - [`ExportSelectionPlanner`] - selective export, best-effort import and sync
//! - [`diff`] - entity comparison between two clusters

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod assignment;
pub mod cache;
pub mod cancel;
pub mod cluster;
pub mod config;
pub mod diff;
pub mod error;
pub mod export;
pub mod gateway;
pub mod model;
pub mod search;
pub mod session;
pub mod token;

pub use assignment::{AssignmentCoordinator, AssignmentOutcome, AssignmentRequest};
pub use cache::{CacheEntry, PrimeReport, RoleCache};
pub use cancel::CancellationToken;
pub use cluster::{Cluster, ClusterRegistry, ClusterStore, Credentials, FileClusterStore};
pub use config::DirectorySettings;
pub use diff::{
    diff_client_snapshots, diff_clients, diff_group_snapshots, diff_groups, diff_realm_roles,
    diff_roles, diff_user_snapshots, diff_users, ClientSnapshot, Difference, GroupSnapshot,
    UserSnapshot,
};
pub use error::{DirectoryError, DirectoryResult, ErrorKind, FailedTarget, PartialFailure};
pub use export::{
    ExportCandidate, ExportEntities, ExportPayload, ExportSelectionPlanner, ImportReport,
};
pub use gateway::{
    DirectoryGateway, GatewayFactory, Gateways, HttpDirectoryGateway, MemoryDirectory,
};
pub use model::{
    Attributes, Client, ClientKey, ClientRoleMap, ClusterId, EntityType, Group, PrincipalRef, Role,
    RoleBearer, RoleMappings, RoleScope, SearchType, User,
};
pub use search::{
    ClusterHealth, FederatedSearch, HealthStatus, SearchData, SearchOutcome, SearchResult,
};
pub use session::{ClusterSession, DialogMode};
pub use token::{inspect_token, Grant, TokenInspection, TokenResponse};

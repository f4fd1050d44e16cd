//! Directory domain model.
//!
//! These types mirror entities owned by the remote authorization servers.
//! They are transient copies; nothing here is persisted by this crate.
//!
//! Field names serialize in the camelCase shape used by the admin API so
//! the same types double as request and response bodies.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;

/// Stable external identifier of a client (the admin API's `clientId`).
///
/// Used as the cache key for client roles, since callers usually only know
/// the external key and not the server-generated id.
pub type ClientKey = String;

/// Role names held by a principal, per client.
pub type ClientRoleMap = BTreeMap<ClientKey, BTreeSet<String>>;

/// Free-form multi-valued attributes of users and groups.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// Identifier of a registered cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ClusterId {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| DirectoryError::invalid(format!("invalid cluster id '{s}'")))
    }
}

/// A role, realm-scoped or client-scoped.
///
/// Composite roles are treated as opaque leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// Server-generated identifier; empty for representations not yet
    /// created on a cluster.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Role name (unique within its scope).
    pub name: String,
    /// Role description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the role aggregates other roles.
    #[serde(default)]
    pub composite: bool,
}

impl Role {
    /// Creates a role with the given id and name.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            composite: false,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Where a role lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "client", rename_all = "lowercase")]
pub enum RoleScope {
    /// Global to the cluster's realm.
    Realm,
    /// Owned by one client.
    Client(ClientKey),
}

impl RoleScope {
    /// Label used in reports (`realm` or `client:<key>`).
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Realm => "realm".to_string(),
            Self::Client(key) => format!("client:{key}"),
        }
    }
}

/// A user in a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Server-generated identifier; empty for representations not yet
    /// created on a cluster.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Username.
    pub username: String,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// First name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Whether the user is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Realm roles held directly.
    #[serde(default)]
    pub realm_roles: BTreeSet<String>,
    /// Client roles held directly.
    #[serde(default)]
    pub client_roles: ClientRoleMap,
    /// Paths of the groups the user belongs to.
    #[serde(default)]
    pub groups: BTreeSet<String>,
    /// Custom attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    /// Actions the user must complete at next login.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_actions: Vec<String>,
}

/// A group in a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Server-generated identifier; empty for representations not yet
    /// created on a cluster.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Group name.
    pub name: String,
    /// Full path (e.g., `/engineering/platform`).
    #[serde(default)]
    pub path: String,
    /// Realm roles mapped to the group.
    #[serde(default)]
    pub realm_roles: BTreeSet<String>,
    /// Client roles mapped to the group.
    #[serde(default)]
    pub client_roles: ClientRoleMap,
    /// Custom attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

/// A registered application or service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// Server-generated identifier; empty for representations not yet
    /// created on a cluster.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Stable external key.
    #[serde(rename = "clientId")]
    pub client_key: ClientKey,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Protocol (`openid-connect` or `saml`).
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Whether this is a public client.
    #[serde(default)]
    pub public_client: bool,
    /// Whether the client is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Allowed redirect URIs.
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Allowed web origins.
    #[serde(default)]
    pub web_origins: Vec<String>,
    /// Whether the client only accepts bearer tokens.
    #[serde(default)]
    pub bearer_only: bool,
    /// Whether the password grant is allowed.
    #[serde(default)]
    pub direct_access_grants_enabled: bool,
    /// Whether the client has a service account.
    #[serde(default)]
    pub service_accounts_enabled: bool,
    /// Client scopes always applied.
    #[serde(default)]
    pub default_client_scopes: Vec<String>,
    /// Client scopes applied on request.
    #[serde(default)]
    pub optional_client_scopes: Vec<String>,
}

fn default_protocol() -> String {
    "openid-connect".to_string()
}

impl Client {
    /// Creates an enabled confidential OIDC client.
    #[must_use]
    pub fn new(client_key: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            client_key: client_key.into(),
            name: None,
            protocol: default_protocol(),
            public_client: false,
            enabled: true,
            redirect_uris: Vec::new(),
            web_origins: Vec::new(),
            bearer_only: false,
            direct_access_grants_enabled: false,
            service_accounts_enabled: false,
            default_client_scopes: Vec::new(),
            optional_client_scopes: Vec::new(),
        }
    }
}

/// Anything that can hold role assignments.
pub trait RoleBearer {
    /// Reference used to address the principal in the admin API.
    fn principal_ref(&self) -> PrincipalRef;
    /// Realm roles currently held.
    fn realm_roles(&self) -> &BTreeSet<String>;
    /// Client roles currently held.
    fn client_roles(&self) -> &ClientRoleMap;
}

impl RoleBearer for User {
    fn principal_ref(&self) -> PrincipalRef {
        PrincipalRef::User(self.id.clone())
    }

    fn realm_roles(&self) -> &BTreeSet<String> {
        &self.realm_roles
    }

    fn client_roles(&self) -> &ClientRoleMap {
        &self.client_roles
    }
}

impl RoleBearer for Group {
    fn principal_ref(&self) -> PrincipalRef {
        PrincipalRef::Group(self.id.clone())
    }

    fn realm_roles(&self) -> &BTreeSet<String> {
        &self.realm_roles
    }

    fn client_roles(&self) -> &ClientRoleMap {
        &self.client_roles
    }
}

/// Roles mapped directly to a principal, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleMappings {
    /// Realm roles.
    pub realm_roles: BTreeSet<String>,
    /// Client roles by client key. Clients without mapped roles are absent.
    pub client_roles: ClientRoleMap,
}

impl RoleMappings {
    /// Copies the mappings a principal representation carries.
    #[must_use]
    pub fn of(principal: &impl RoleBearer) -> Self {
        Self {
            realm_roles: principal.realm_roles().clone(),
            client_roles: principal
                .client_roles()
                .iter()
                .filter(|(_, names)| !names.is_empty())
                .map(|(key, names)| (key.clone(), names.clone()))
                .collect(),
        }
    }

    /// Checks whether nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.realm_roles.is_empty() && self.client_roles.is_empty()
    }
}

/// Reference to a user or group by server id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum PrincipalRef {
    /// A user id.
    User(String),
    /// A group id.
    Group(String),
}

impl PrincipalRef {
    /// Server id of the principal.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::User(id) | Self::Group(id) => id,
        }
    }

    /// Admin API collection segment (`users` or `groups`).
    #[must_use]
    pub const fn collection(&self) -> &'static str {
        match self {
            Self::User(_) => "users",
            Self::Group(_) => "groups",
        }
    }
}

impl fmt::Display for PrincipalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Exportable entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// Users.
    User,
    /// Groups.
    Group,
    /// Clients.
    Client,
    /// Realm roles.
    Role,
}

impl EntityType {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Client => "client",
            Self::Role => "role",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "users" => Ok(Self::User),
            "group" | "groups" => Ok(Self::Group),
            "client" | "clients" => Ok(Self::Client),
            "role" | "roles" => Ok(Self::Role),
            other => Err(DirectoryError::invalid(format!("unknown entity type '{other}'"))),
        }
    }
}

/// Entity types that can be searched across clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// Match username or email.
    User,
    /// Match client key or display name.
    Client,
    /// Match realm role name.
    Role,
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Client => "client",
            Self::Role => "role",
        })
    }
}

impl FromStr for SearchType {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "client" => Ok(Self::Client),
            "role" => Ok(Self::Role),
            other => Err(DirectoryError::invalid(format!("unknown search type '{other}'"))),
        }
    }
}

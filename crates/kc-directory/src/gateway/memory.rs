//! In-process directory.
//!
//! Behaves like a single realm of an admin API: names are unique per
//! scope, role assignment is additive, and unknown references fail with
//! `NotFound`. Every call is counted per operation, and latency or
//! failures can be injected, so coordinator behavior can be observed
//! without a network.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::DirectoryGateway;
use crate::error::{DirectoryError, DirectoryResult};
use crate::model::{
    Client, ClientKey, ClientRoleMap, Group, PrincipalRef, Role, RoleMappings, RoleScope, User,
};
use crate::token::{Grant, TokenResponse};

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    users: Vec<User>,
    groups: Vec<Group>,
    clients: Vec<Client>,
    realm_roles: Vec<Role>,
    client_roles: HashMap<ClientKey, Vec<Role>>,
    secrets: HashMap<ClientKey, String>,
    imported_realms: Vec<Value>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn client_exists(&self, key: &str) -> bool {
        self.clients.iter().any(|c| c.client_key == key)
    }

    fn roles_mut(&mut self, scope: &RoleScope) -> DirectoryResult<&mut Vec<Role>> {
        match scope {
            RoleScope::Realm => Ok(&mut self.realm_roles),
            RoleScope::Client(key) => {
                if !self.client_exists(key) {
                    return Err(DirectoryError::not_found("Client", key.clone()));
                }
                Ok(self.client_roles.entry(key.clone()).or_default())
            }
        }
    }
}

/// In-memory directory gateway.
#[derive(Debug)]
pub struct MemoryDirectory {
    realm: String,
    state: Mutex<State>,
    calls: Mutex<HashMap<&'static str, usize>>,
    latency: Mutex<Option<Duration>>,
    failures: Mutex<HashMap<String, DirectoryError>>,
    unreachable: Mutex<bool>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    /// Creates an empty directory for realm `demo`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_realm("demo")
    }

    /// Creates an empty directory for the given realm.
    #[must_use]
    pub fn with_realm(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            state: Mutex::new(State::default()),
            calls: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            failures: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(false),
        }
    }

    // === Seeding ===

    /// Adds a user; returns its id.
    pub fn seed_user(&self, mut user: User) -> String {
        let mut state = self.state.lock();
        if user.id.is_empty() {
            user.id = state.next_id("user");
        }
        let id = user.id.clone();
        state.users.push(user);
        id
    }

    /// Adds a group; returns its id.
    pub fn seed_group(&self, mut group: Group) -> String {
        let mut state = self.state.lock();
        if group.id.is_empty() {
            group.id = state.next_id("group");
        }
        if group.path.is_empty() {
            group.path = format!("/{}", group.name);
        }
        let id = group.id.clone();
        state.groups.push(group);
        id
    }

    /// Adds a client with its roles; returns its id.
    pub fn seed_client(&self, mut client: Client, roles: &[&str]) -> String {
        let mut state = self.state.lock();
        if client.id.is_empty() {
            client.id = state.next_id("client");
        }
        let id = client.id.clone();
        let roles = roles
            .iter()
            .map(|name| {
                let role_id = state.next_id("role");
                Role::new(role_id, *name)
            })
            .collect();
        state.client_roles.insert(client.client_key.clone(), roles);
        state.clients.push(client);
        id
    }

    /// Adds realm roles.
    pub fn seed_realm_roles(&self, names: &[&str]) {
        let mut state = self.state.lock();
        for name in names {
            let id = state.next_id("role");
            state.realm_roles.push(Role::new(id, *name));
        }
    }

    /// Sets a client's secret.
    pub fn seed_secret(&self, client_key: &str, secret: &str) {
        self.state
            .lock()
            .secrets
            .insert(client_key.to_string(), secret.to_string());
    }

    // === Fault injection ===

    /// Delays every call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Fails every call with `Unreachable` while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock() = unreachable;
    }

    /// Fails calls of `operation` with `error`. For client-scoped operations,
    /// `operation` may be suffixed with `:<clientKey>` to target one client.
    pub fn fail(&self, operation: &str, error: DirectoryError) {
        self.failures.lock().insert(operation.to_string(), error);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    // === Inspection ===

    /// Number of calls made to an operation.
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    /// Number of calls made to any operation.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    /// Snapshot of the users.
    #[must_use]
    pub fn users(&self) -> Vec<User> {
        self.state.lock().users.clone()
    }

    /// Gets a user by id.
    #[must_use]
    pub fn user(&self, id: &str) -> Option<User> {
        self.state.lock().users.iter().find(|u| u.id == id).cloned()
    }

    /// Gets a group by id.
    #[must_use]
    pub fn group(&self, id: &str) -> Option<Group> {
        self.state.lock().groups.iter().find(|g| g.id == id).cloned()
    }

    /// Realm payloads received by `import_realm`.
    #[must_use]
    pub fn imported_realms(&self) -> Vec<Value> {
        self.state.lock().imported_realms.clone()
    }

    async fn enter(&self, operation: &'static str, target: Option<&str>) -> DirectoryResult<()> {
        *self.calls.lock().entry(operation).or_default() += 1;

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if *self.unreachable.lock() {
            return Err(DirectoryError::unreachable("connection refused"));
        }
        let failures = self.failures.lock();
        if let Some(target) = target {
            if let Some(err) = failures.get(&format!("{operation}:{target}")) {
                return Err(err.clone());
            }
        }
        match failures.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn with_principal<T>(
        state: &mut State,
        principal: &PrincipalRef,
        f: impl FnOnce(&mut BTreeSet<String>, &mut ClientRoleMap) -> T,
    ) -> DirectoryResult<T> {
        match principal {
            PrincipalRef::User(id) => state
                .users
                .iter_mut()
                .find(|u| &u.id == id)
                .map(|u| f(&mut u.realm_roles, &mut u.client_roles))
                .ok_or_else(|| DirectoryError::not_found("User", id.clone())),
            PrincipalRef::Group(id) => state
                .groups
                .iter_mut()
                .find(|g| &g.id == id)
                .map(|g| f(&mut g.realm_roles, &mut g.client_roles))
                .ok_or_else(|| DirectoryError::not_found("Group", id.clone())),
        }
    }

    fn issue_token(&self, subject: &str, roles: &[String]) -> TokenResponse {
        let now = Utc::now().timestamp();
        let header = json!({"alg": "none", "typ": "JWT"});
        let claims = json!({
            "iss": format!("memory://realms/{}", self.realm),
            "sub": subject,
            "iat": now,
            "exp": now + 300,
            "realm_access": {"roles": roles},
        });
        let encode = |v: &Value| URL_SAFE_NO_PAD.encode(v.to_string());
        TokenResponse {
            access_token: format!("{}.{}.", encode(&header), encode(&claims)),
            token_type: "Bearer".to_string(),
            expires_in: 300,
            refresh_token: None,
            scope: None,
        }
    }
}

#[async_trait]
impl DirectoryGateway for MemoryDirectory {
    async fn list_users(&self) -> DirectoryResult<Vec<User>> {
        self.enter("list_users", None).await?;
        Ok(self.state.lock().users.clone())
    }

    async fn list_groups(&self) -> DirectoryResult<Vec<Group>> {
        self.enter("list_groups", None).await?;
        Ok(self.state.lock().groups.clone())
    }

    async fn list_clients(&self) -> DirectoryResult<Vec<Client>> {
        self.enter("list_clients", None).await?;
        Ok(self.state.lock().clients.clone())
    }

    async fn role_mappings(&self, principal: &PrincipalRef) -> DirectoryResult<RoleMappings> {
        self.enter("role_mappings", None).await?;
        let state = self.state.lock();
        match principal {
            PrincipalRef::User(id) => state
                .users
                .iter()
                .find(|u| &u.id == id)
                .map(RoleMappings::of)
                .ok_or_else(|| DirectoryError::not_found("User", id.clone())),
            PrincipalRef::Group(id) => state
                .groups
                .iter()
                .find(|g| &g.id == id)
                .map(RoleMappings::of)
                .ok_or_else(|| DirectoryError::not_found("Group", id.clone())),
        }
    }

    async fn user_groups(&self, user_id: &str) -> DirectoryResult<BTreeSet<String>> {
        self.enter("user_groups", None).await?;
        self.state
            .lock()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.groups.clone())
            .ok_or_else(|| DirectoryError::not_found("User", user_id))
    }

    async fn list_realm_roles(&self) -> DirectoryResult<Vec<Role>> {
        self.enter("list_realm_roles", None).await?;
        Ok(self.state.lock().realm_roles.clone())
    }

    async fn list_client_roles(&self, client_key: &str) -> DirectoryResult<Vec<Role>> {
        self.enter("list_client_roles", Some(client_key)).await?;
        let state = self.state.lock();
        if !state.client_exists(client_key) {
            return Err(DirectoryError::not_found("Client", client_key));
        }
        Ok(state.client_roles.get(client_key).cloned().unwrap_or_default())
    }

    async fn create_user(&self, user: &User) -> DirectoryResult<String> {
        self.enter("create_user", None).await?;
        let mut state = self.state.lock();
        if state.users.iter().any(|u| u.username == user.username) {
            return Err(DirectoryError::conflict("User", user.username.clone()));
        }
        let mut user = user.clone();
        user.id = state.next_id("user");
        let id = user.id.clone();
        state.users.push(user);
        Ok(id)
    }

    async fn create_group(&self, group: &Group) -> DirectoryResult<String> {
        self.enter("create_group", None).await?;
        let mut state = self.state.lock();
        if state.groups.iter().any(|g| g.name == group.name) {
            return Err(DirectoryError::conflict("Group", group.name.clone()));
        }
        let mut group = group.clone();
        group.id = state.next_id("group");
        group.path = format!("/{}", group.name);
        let id = group.id.clone();
        state.groups.push(group);
        Ok(id)
    }

    async fn create_role(&self, scope: &RoleScope, role: &Role) -> DirectoryResult<()> {
        self.enter("create_role", None).await?;
        let mut state = self.state.lock();
        let id = state.next_id("role");
        let roles = state.roles_mut(scope)?;
        if roles.iter().any(|r| r.name == role.name) {
            return Err(DirectoryError::conflict("Role", role.name.clone()));
        }
        let mut role = role.clone();
        role.id = id;
        roles.push(role);
        Ok(())
    }

    async fn create_client(&self, client: &Client) -> DirectoryResult<String> {
        self.enter("create_client", None).await?;
        let mut state = self.state.lock();
        if state.client_exists(&client.client_key) {
            return Err(DirectoryError::conflict("Client", client.client_key.clone()));
        }
        let mut client = client.clone();
        client.id = state.next_id("client");
        let id = client.id.clone();
        state.client_roles.entry(client.client_key.clone()).or_default();
        state.clients.push(client);
        Ok(id)
    }

    async fn update_user(&self, id: &str, user: &User) -> DirectoryResult<()> {
        self.enter("update_user", None).await?;
        let mut state = self.state.lock();
        let existing = state
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| DirectoryError::not_found("User", id))?;
        existing.email.clone_from(&user.email);
        existing.first_name.clone_from(&user.first_name);
        existing.last_name.clone_from(&user.last_name);
        existing.enabled = user.enabled;
        existing.attributes.clone_from(&user.attributes);
        existing.required_actions.clone_from(&user.required_actions);
        Ok(())
    }

    async fn update_group(&self, id: &str, group: &Group) -> DirectoryResult<()> {
        self.enter("update_group", None).await?;
        let mut state = self.state.lock();
        let existing = state
            .groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| DirectoryError::not_found("Group", id))?;
        existing.name.clone_from(&group.name);
        existing.path = format!("/{}", group.name);
        existing.attributes.clone_from(&group.attributes);
        Ok(())
    }

    async fn update_role(&self, scope: &RoleScope, name: &str, role: &Role) -> DirectoryResult<()> {
        self.enter("update_role", None).await?;
        let mut state = self.state.lock();
        let existing = state
            .roles_mut(scope)?
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| DirectoryError::not_found("Role", name))?;
        existing.description.clone_from(&role.description);
        existing.composite = role.composite;
        Ok(())
    }

    async fn update_client(&self, id: &str, client: &Client) -> DirectoryResult<()> {
        self.enter("update_client", None).await?;
        let mut state = self.state.lock();
        let existing = state
            .clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| DirectoryError::not_found("Client", id))?;
        let id = existing.id.clone();
        *existing = client.clone();
        existing.id = id;
        Ok(())
    }

    async fn assign_realm_roles(
        &self,
        principal: &PrincipalRef,
        names: &[String],
    ) -> DirectoryResult<()> {
        self.enter("assign_realm_roles", None).await?;
        let mut state = self.state.lock();
        if let Some(missing) = names
            .iter()
            .find(|n| !state.realm_roles.iter().any(|r| &r.name == *n))
        {
            return Err(DirectoryError::not_found("Role", missing.clone()));
        }
        Self::with_principal(&mut state, principal, |realm, _| {
            realm.extend(names.iter().cloned());
        })
    }

    async fn assign_client_roles(
        &self,
        principal: &PrincipalRef,
        client_key: &str,
        names: &[String],
    ) -> DirectoryResult<()> {
        self.enter("assign_client_roles", Some(client_key)).await?;
        let mut state = self.state.lock();
        if !state.client_exists(client_key) {
            return Err(DirectoryError::not_found("Client", client_key));
        }
        let available = state.client_roles.get(client_key).cloned().unwrap_or_default();
        if let Some(missing) = names
            .iter()
            .find(|n| !available.iter().any(|r| &r.name == *n))
        {
            return Err(DirectoryError::not_found("Role", missing.clone()));
        }
        Self::with_principal(&mut state, principal, |_, clients| {
            clients
                .entry(client_key.to_string())
                .or_default()
                .extend(names.iter().cloned());
        })
    }

    async fn add_user_to_group(&self, user_id: &str, group_id: &str) -> DirectoryResult<()> {
        self.enter("add_user_to_group", None).await?;
        let mut state = self.state.lock();
        let path = state
            .groups
            .iter()
            .find(|g| g.id == group_id)
            .map(|g| g.path.clone())
            .ok_or_else(|| DirectoryError::not_found("Group", group_id))?;
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| DirectoryError::not_found("User", user_id))?;
        user.groups.insert(path);
        Ok(())
    }

    async fn get_client_secret(&self, client_key: &str) -> DirectoryResult<String> {
        self.enter("get_client_secret", Some(client_key)).await?;
        let state = self.state.lock();
        let client = state
            .clients
            .iter()
            .find(|c| c.client_key == client_key)
            .ok_or_else(|| DirectoryError::not_found("Client", client_key))?;
        if client.public_client {
            return Err(DirectoryError::invalid(format!(
                "client '{client_key}' is public and has no secret"
            )));
        }
        state
            .secrets
            .get(client_key)
            .cloned()
            .ok_or_else(|| DirectoryError::not_found("ClientSecret", client_key))
    }

    async fn export_realm(&self) -> DirectoryResult<Value> {
        self.enter("export_realm", None).await?;
        let state = self.state.lock();
        Ok(json!({
            "realm": self.realm,
            "enabled": true,
            "users": state.users,
            "groups": state.groups,
            "clients": state.clients,
            "roles": {
                "realm": state.realm_roles,
                "client": state.client_roles,
            },
        }))
    }

    async fn import_realm(&self, payload: &Value) -> DirectoryResult<()> {
        self.enter("import_realm", None).await?;
        let name = payload
            .get("realm")
            .and_then(Value::as_str)
            .ok_or_else(|| DirectoryError::invalid("realm payload has no 'realm' name"))?;
        let mut state = self.state.lock();
        let taken = name == self.realm
            || state
                .imported_realms
                .iter()
                .any(|r| r.get("realm").and_then(Value::as_str) == Some(name));
        if taken {
            return Err(DirectoryError::conflict("Realm", name));
        }
        state.imported_realms.push(payload.clone());
        Ok(())
    }

    async fn get_token(&self, grant: &Grant) -> DirectoryResult<TokenResponse> {
        self.enter("get_token", None).await?;
        grant.form()?;
        let state = self.state.lock();
        match grant {
            Grant::Password { username, .. } => {
                let user = state
                    .users
                    .iter()
                    .find(|u| &u.username == username && u.enabled)
                    .ok_or_else(|| {
                        DirectoryError::Unauthorized("invalid user credentials".to_string())
                    })?;
                let roles: Vec<String> = user.realm_roles.iter().cloned().collect();
                Ok(self.issue_token(&user.id, &roles))
            }
            Grant::ClientCredentials {
                client_id,
                client_secret,
            } => match state.secrets.get(client_id) {
                Some(secret) if secret == client_secret => Ok(self.issue_token(client_id, &[])),
                _ => Err(DirectoryError::Unauthorized(
                    "invalid client credentials".to_string(),
                )),
            },
        }
    }

    async fn health(&self) -> DirectoryResult<()> {
        self.enter("health", None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::inspect_token;

    fn directory() -> MemoryDirectory {
        let dir = MemoryDirectory::new();
        dir.seed_realm_roles(&["viewer", "editor"]);
        dir.seed_client(Client::new("app1"), &["read", "write"]);
        dir
    }

    #[tokio::test]
    async fn assignment_is_additive() {
        let dir = directory();
        let id = dir.seed_user(User {
            username: "alice".to_string(),
            enabled: true,
            ..User::default()
        });
        let principal = PrincipalRef::User(id.clone());

        dir.assign_realm_roles(&principal, &["viewer".to_string()]).await.unwrap();
        dir.assign_realm_roles(&principal, &["viewer".to_string(), "editor".to_string()])
            .await
            .unwrap();

        let user = dir.user(&id).unwrap();
        assert_eq!(user.realm_roles.len(), 2);
        assert_eq!(dir.calls("assign_realm_roles"), 2);
    }

    #[tokio::test]
    async fn unknown_names_are_not_found() {
        let dir = directory();
        let principal = PrincipalRef::User("nobody".to_string());

        let err = dir
            .assign_client_roles(&principal, "app1", &["read".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = dir.list_client_roles("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let dir = directory();
        let err = dir.create_client(&Client::new("app1")).await.unwrap_err();
        assert!(err.is_conflict());

        let err = dir
            .create_role(&RoleScope::Client("app1".to_string()), &Role::new("", "read"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn role_update_keeps_the_full_representation() {
        let dir = directory();
        let mut editor = Role::new("", "editor").with_description("Edits");
        editor.composite = true;

        dir.update_role(&RoleScope::Realm, "editor", &editor).await.unwrap();

        let stored = dir.list_realm_roles().await.unwrap();
        let stored = stored.iter().find(|r| r.name == "editor").unwrap();
        assert!(stored.composite);
        assert_eq!(stored.description.as_deref(), Some("Edits"));
        assert!(!stored.id.is_empty());
    }

    #[tokio::test]
    async fn mappings_reflect_assignments() {
        let dir = directory();
        let id = dir.seed_user(User {
            username: "alice".to_string(),
            ..User::default()
        });
        let principal = PrincipalRef::User(id.clone());
        dir.assign_client_roles(&principal, "app1", &["write".to_string()])
            .await
            .unwrap();

        let mappings = dir.role_mappings(&principal).await.unwrap();
        assert!(mappings.realm_roles.is_empty());
        assert!(mappings.client_roles["app1"].contains("write"));

        let err = dir
            .role_mappings(&PrincipalRef::Group("nope".to_string()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(dir.user_groups(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn targeted_failures_only_hit_their_client() {
        let dir = directory();
        dir.seed_client(Client::new("app2"), &["read"]);
        dir.fail("list_client_roles:app1", DirectoryError::unreachable("down"));

        assert!(dir.list_client_roles("app1").await.is_err());
        assert!(dir.list_client_roles("app2").await.is_ok());
        assert_eq!(dir.calls("list_client_roles"), 2);
    }

    #[tokio::test]
    async fn password_grant_issues_inspectable_token() {
        let dir = directory();
        let mut user = User {
            username: "alice".to_string(),
            enabled: true,
            ..User::default()
        };
        user.realm_roles.insert("viewer".to_string());
        dir.seed_user(user);

        let token = dir
            .get_token(&Grant::Password {
                client_id: None,
                username: "alice".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        let inspection = inspect_token(&token.access_token, Utc::now()).unwrap();
        assert_eq!(inspection.realm_roles(), vec!["viewer"]);
        assert!(!inspection.expired);
    }
}

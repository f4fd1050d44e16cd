//! Admin REST API gateway.
//!
//! Talks to `{base}/admin/realms/{realm}/...` with a bearer token obtained
//! through a password grant at `{base}/realms/{realm}/protocol/openid-connect/token`.
//! The admin token is cached until shortly before it expires and is
//! re-acquired once when a request comes back `401`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{DirectoryGateway, GatewayFactory};
use crate::cluster::Cluster;
use crate::config::DirectorySettings;
use crate::error::{DirectoryError, DirectoryResult};
use crate::model::{Client, Group, PrincipalRef, Role, RoleMappings, RoleScope, User};
use crate::token::{Grant, TokenResponse};

/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Page size used when listing users.
const USER_PAGE_SIZE: usize = 100;

/// Entity named in status-derived errors.
#[derive(Clone, Copy)]
struct Subject<'a> {
    entity_type: &'static str,
    name: &'a str,
}

const fn subject<'a>(entity_type: &'static str, name: &'a str) -> Subject<'a> {
    Subject { entity_type, name }
}

struct AdminToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
}

/// Body of `GET .../{users|groups}/{id}/role-mappings`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingsRepresentation {
    #[serde(default)]
    realm_mappings: Vec<Role>,
    /// Keyed by client key.
    #[serde(default)]
    client_mappings: HashMap<String, ClientMappings>,
}

#[derive(Deserialize)]
struct ClientMappings {
    /// Client key; same as the map key.
    #[serde(default)]
    client: Option<String>,
    #[serde(default)]
    mappings: Vec<Role>,
}

impl From<MappingsRepresentation> for RoleMappings {
    fn from(body: MappingsRepresentation) -> Self {
        let names = |roles: Vec<Role>| roles.into_iter().map(|r| r.name).collect::<BTreeSet<_>>();
        Self {
            realm_roles: names(body.realm_mappings),
            client_roles: body
                .client_mappings
                .into_iter()
                .filter(|(_, client)| !client.mappings.is_empty())
                .map(|(key, client)| (client.client.unwrap_or(key), names(client.mappings)))
                .collect(),
        }
    }
}

/// Gateway backed by a cluster's admin REST API.
pub struct HttpDirectoryGateway {
    http: reqwest::Client,
    cluster: Cluster,
    admin_client_id: String,
    token: Mutex<Option<AdminToken>>,
}

impl HttpDirectoryGateway {
    /// Creates a gateway for a cluster.
    ///
    /// ## Errors
    ///
    /// Returns `Invalid` if the HTTP client cannot be built.
    pub fn new(cluster: Cluster, settings: &DirectorySettings) -> DirectoryResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            http,
            cluster,
            admin_client_id: settings.admin_client_id.clone(),
            token: Mutex::new(None),
        })
    }

    /// Factory building one HTTP gateway per cluster.
    pub fn factory(settings: DirectorySettings) -> impl GatewayFactory + 'static {
        move |cluster: &Cluster| -> DirectoryResult<Arc<dyn DirectoryGateway>> {
            Ok(Arc::new(Self::new(cluster.clone(), &settings)?))
        }
    }

    /// The cluster this gateway talks to.
    #[must_use]
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    fn admin_url(&self, path: &str) -> String {
        format!(
            "{}/admin/realms/{}{}",
            self.cluster.endpoint(),
            self.cluster.realm,
            path
        )
    }

    fn realm_url(&self, path: &str) -> String {
        format!(
            "{}/realms/{}{}",
            self.cluster.endpoint(),
            self.cluster.realm,
            path
        )
    }

    async fn request_token(&self, grant: &Grant) -> DirectoryResult<TokenResponse> {
        let response = self
            .http
            .post(self.realm_url("/protocol/openid-connect/token"))
            .form(&grant.form()?)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                DirectoryError::Unauthorized(format!(
                    "{} grant rejected: {message}",
                    grant.grant_type()
                ))
            }
            _ => status_error(status, &message, subject("Realm", &self.cluster.realm)),
        })
    }

    async fn admin_token(&self, force_refresh: bool) -> DirectoryResult<String> {
        let mut cached = self.token.lock().await;
        if !force_refresh {
            if let Some(token) = cached.as_ref().filter(|t| t.refresh_at > Instant::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let credentials = &self.cluster.credentials;
        let grant = Grant::Password {
            client_id: Some(self.admin_client_id.clone()),
            username: credentials.username.clone(),
            password: credentials.resolve_password()?,
        };
        let token = self.request_token(&grant).await?;
        tracing::debug!(
            cluster = %self.cluster.id,
            expires_in = token.expires_in,
            "Admin token acquired"
        );

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_SKEW);
        let access_token = token.access_token;
        *cached = Some(AdminToken {
            access_token: access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(access_token)
    }

    /// Sends an authenticated admin request and maps non-success statuses.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        subject: Subject<'_>,
    ) -> DirectoryResult<Response> {
        let mut refreshed = false;
        loop {
            let token = self.admin_token(refreshed).await?;
            let mut request = self.http.request(method.clone(), url).bearer_auth(token);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await.map_err(|e| {
                tracing::warn!(
                    cluster = %self.cluster.id,
                    %method,
                    url,
                    error = %e,
                    "Admin request failed"
                );
                DirectoryError::from(e)
            })?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed {
                tracing::debug!(
                    cluster = %self.cluster.id,
                    "Admin token rejected, re-authenticating"
                );
                refreshed = true;
                continue;
            }
            if status.is_success() {
                return Ok(response);
            }

            let message = response.text().await.unwrap_or_default();
            let err = status_error(status, &message, subject);
            tracing::debug!(
                cluster = %self.cluster.id,
                %method,
                url,
                %status,
                error = %err,
                "Admin request rejected"
            );
            return Err(err);
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        subject: Subject<'_>,
    ) -> DirectoryResult<T> {
        let response = self
            .send(Method::GET, &self.admin_url(path), None, subject)
            .await?;
        Ok(response.json().await?)
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        subject: Subject<'_>,
    ) -> DirectoryResult<Response> {
        let body = serde_json::to_value(body)?;
        self.send(Method::POST, &self.admin_url(path), Some(&body), subject)
            .await
    }

    async fn put_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        subject: Subject<'_>,
    ) -> DirectoryResult<()> {
        let body = serde_json::to_value(body)?;
        self.send(Method::PUT, &self.admin_url(path), Some(&body), subject)
            .await?;
        Ok(())
    }

    /// Posts a representation and returns the id the server assigned.
    async fn create<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        subject: Subject<'_>,
    ) -> DirectoryResult<String> {
        let response = self.post_json(path, body, subject).await?;
        created_id(&response)
    }

    /// Finds a client by its external key.
    async fn find_client(&self, client_key: &str) -> DirectoryResult<Client> {
        let clients: Vec<Client> = self
            .get_json(
                &format!("/clients?clientId={}", urlencoding::encode(client_key)),
                subject("Client", client_key),
            )
            .await?;

        clients
            .into_iter()
            .find(|c| c.client_key == client_key)
            .ok_or_else(|| DirectoryError::not_found("Client", client_key))
    }

    fn roles_path(scope_client_id: Option<&str>) -> String {
        match scope_client_id {
            Some(id) => format!("/clients/{id}/roles"),
            None => "/roles".to_string(),
        }
    }

    /// Picks the named roles out of a scope's role list.
    fn select_roles(available: Vec<Role>, names: &[String]) -> DirectoryResult<Vec<Role>> {
        if let Some(missing) = names.iter().find(|n| !available.iter().any(|r| &r.name == *n)) {
            return Err(DirectoryError::not_found("Role", missing.clone()));
        }
        Ok(available
            .into_iter()
            .filter(|r| names.contains(&r.name))
            .collect())
    }
}

impl std::fmt::Debug for HttpDirectoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDirectoryGateway")
            .field("cluster", &self.cluster.id)
            .field("endpoint", &self.cluster.endpoint())
            .field("realm", &self.cluster.realm)
            .finish_non_exhaustive()
    }
}

/// Maps a non-success admin API status to an error.
fn status_error(status: StatusCode, message: &str, subject: Subject<'_>) -> DirectoryError {
    match status.as_u16() {
        401 | 403 => DirectoryError::Unauthorized(format!("{status}: {message}")),
        404 => DirectoryError::not_found(subject.entity_type, subject.name),
        409 => DirectoryError::conflict(subject.entity_type, subject.name),
        400..=499 => DirectoryError::invalid(format!("{status}: {message}")),
        _ => DirectoryError::unreachable(format!("{status}: {message}")),
    }
}

/// Extracts the created entity's id from the `Location` header.
fn created_id(response: &Response) -> DirectoryResult<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DirectoryError::invalid("create response has no Location header"))
}

#[async_trait]
impl DirectoryGateway for HttpDirectoryGateway {
    async fn list_users(&self) -> DirectoryResult<Vec<User>> {
        let mut users = Vec::new();
        loop {
            let page: Vec<User> = self
                .get_json(
                    &format!("/users?first={}&max={USER_PAGE_SIZE}", users.len()),
                    subject("Realm", &self.cluster.realm),
                )
                .await?;
            let done = page.len() < USER_PAGE_SIZE;
            users.extend(page);
            if done {
                return Ok(users);
            }
        }
    }

    async fn list_groups(&self) -> DirectoryResult<Vec<Group>> {
        self.get_json("/groups", subject("Realm", &self.cluster.realm))
            .await
    }

    async fn list_clients(&self) -> DirectoryResult<Vec<Client>> {
        self.get_json("/clients", subject("Realm", &self.cluster.realm))
            .await
    }

    async fn role_mappings(&self, principal: &PrincipalRef) -> DirectoryResult<RoleMappings> {
        let body: MappingsRepresentation = self
            .get_json(
                &format!("/{}/{}/role-mappings", principal.collection(), principal.id()),
                subject(entity_of(principal), principal.id()),
            )
            .await?;
        Ok(body.into())
    }

    async fn user_groups(&self, user_id: &str) -> DirectoryResult<BTreeSet<String>> {
        let groups: Vec<Group> = self
            .get_json(&format!("/users/{user_id}/groups"), subject("User", user_id))
            .await?;
        Ok(groups.into_iter().map(|g| g.path).collect())
    }

    async fn list_realm_roles(&self) -> DirectoryResult<Vec<Role>> {
        self.get_json("/roles", subject("Realm", &self.cluster.realm))
            .await
    }

    async fn list_client_roles(&self, client_key: &str) -> DirectoryResult<Vec<Role>> {
        let client = self.find_client(client_key).await?;
        self.get_json(
            &Self::roles_path(Some(&client.id)),
            subject("Client", client_key),
        )
        .await
    }

    async fn create_user(&self, user: &User) -> DirectoryResult<String> {
        self.create("/users", user, subject("User", &user.username))
            .await
    }

    async fn create_group(&self, group: &Group) -> DirectoryResult<String> {
        self.create("/groups", group, subject("Group", &group.name))
            .await
    }

    async fn create_role(&self, scope: &RoleScope, role: &Role) -> DirectoryResult<()> {
        let client_id = match scope {
            RoleScope::Realm => None,
            RoleScope::Client(key) => Some(self.find_client(key).await?.id),
        };
        self.post_json(
            &Self::roles_path(client_id.as_deref()),
            role,
            subject("Role", &role.name),
        )
        .await?;
        Ok(())
    }

    async fn create_client(&self, client: &Client) -> DirectoryResult<String> {
        self.create("/clients", client, subject("Client", &client.client_key))
            .await
    }

    async fn update_user(&self, id: &str, user: &User) -> DirectoryResult<()> {
        self.put_json(&format!("/users/{id}"), user, subject("User", id))
            .await
    }

    async fn update_group(&self, id: &str, group: &Group) -> DirectoryResult<()> {
        self.put_json(&format!("/groups/{id}"), group, subject("Group", id))
            .await
    }

    async fn update_role(&self, scope: &RoleScope, name: &str, role: &Role) -> DirectoryResult<()> {
        let client_id = match scope {
            RoleScope::Realm => None,
            RoleScope::Client(key) => Some(self.find_client(key).await?.id),
        };
        let path = format!(
            "{}/{}",
            Self::roles_path(client_id.as_deref()),
            urlencoding::encode(name)
        );
        self.put_json(&path, role, subject("Role", name)).await
    }

    async fn update_client(&self, id: &str, client: &Client) -> DirectoryResult<()> {
        self.put_json(&format!("/clients/{id}"), client, subject("Client", id))
            .await
    }

    async fn assign_realm_roles(
        &self,
        principal: &PrincipalRef,
        names: &[String],
    ) -> DirectoryResult<()> {
        let available = self.list_realm_roles().await?;
        let roles = Self::select_roles(available, names)?;
        let path = format!(
            "/{}/{}/role-mappings/realm",
            principal.collection(),
            principal.id()
        );
        self.post_json(&path, &roles, subject(entity_of(principal), principal.id()))
            .await?;
        Ok(())
    }

    async fn assign_client_roles(
        &self,
        principal: &PrincipalRef,
        client_key: &str,
        names: &[String],
    ) -> DirectoryResult<()> {
        let client = self.find_client(client_key).await?;
        let available: Vec<Role> = self
            .get_json(
                &Self::roles_path(Some(&client.id)),
                subject("Client", client_key),
            )
            .await?;
        let roles = Self::select_roles(available, names)?;
        let path = format!(
            "/{}/{}/role-mappings/clients/{}",
            principal.collection(),
            principal.id(),
            client.id
        );
        self.post_json(&path, &roles, subject(entity_of(principal), principal.id()))
            .await?;
        Ok(())
    }

    async fn add_user_to_group(&self, user_id: &str, group_id: &str) -> DirectoryResult<()> {
        self.send(
            Method::PUT,
            &self.admin_url(&format!("/users/{user_id}/groups/{group_id}")),
            None,
            subject("Group", group_id),
        )
        .await?;
        Ok(())
    }

    async fn get_client_secret(&self, client_key: &str) -> DirectoryResult<String> {
        let client = self.find_client(client_key).await?;
        if client.public_client {
            return Err(DirectoryError::invalid(format!(
                "client '{client_key}' is public and has no secret"
            )));
        }
        let secret: ClientSecret = self
            .get_json(
                &format!("/clients/{}/client-secret", client.id),
                subject("ClientSecret", client_key),
            )
            .await?;
        Ok(secret.value)
    }

    async fn export_realm(&self) -> DirectoryResult<Value> {
        let response = self
            .send(
                Method::POST,
                &self.admin_url("/partial-export?exportClients=true&exportGroupsAndRoles=true"),
                None,
                subject("Realm", &self.cluster.realm),
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn import_realm(&self, payload: &Value) -> DirectoryResult<()> {
        let name = payload
            .get("realm")
            .and_then(Value::as_str)
            .ok_or_else(|| DirectoryError::invalid("realm payload has no 'realm' name"))?;
        let url = format!("{}/admin/realms", self.cluster.endpoint());
        self.send(Method::POST, &url, Some(payload), subject("Realm", name))
            .await?;
        Ok(())
    }

    async fn get_token(&self, grant: &Grant) -> DirectoryResult<TokenResponse> {
        self.request_token(grant).await
    }

    async fn health(&self) -> DirectoryResult<()> {
        let response = self.http.get(self.realm_url("")).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(status_error(status, &message, subject("Realm", &self.cluster.realm)))
    }
}

const fn entity_of(principal: &PrincipalRef) -> &'static str {
    match principal {
        PrincipalRef::User(_) => "User",
        PrincipalRef::Group(_) => "Group",
    }
}

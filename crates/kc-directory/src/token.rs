//! Token grants and inspection.
//!
//! Inspection decodes a JWT's header and payload for display only. The
//! signature is not verified.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DirectoryError, DirectoryResult};

/// Client used when a password grant names none.
pub const DEFAULT_CLIENT_ID: &str = "admin-cli";

/// OAuth 2.0 grant used to obtain a token from a cluster.
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    /// Resource owner password credentials.
    Password {
        /// Client to authenticate through; `admin-cli` when `None`.
        client_id: Option<String>,
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// Client credentials.
    ClientCredentials {
        /// Client id (required).
        client_id: String,
        /// Client secret.
        client_secret: String,
    },
}

impl Grant {
    /// Form fields for the token endpoint.
    ///
    /// ## Errors
    ///
    /// Returns `Invalid` if a client credentials grant has no client id.
    pub fn form(&self) -> DirectoryResult<Vec<(&'static str, String)>> {
        match self {
            Self::Password {
                client_id,
                username,
                password,
            } => Ok(vec![
                ("grant_type", "password".to_string()),
                (
                    "client_id",
                    client_id
                        .clone()
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
                ),
                ("username", username.clone()),
                ("password", password.clone()),
            ]),
            Self::ClientCredentials {
                client_id,
                client_secret,
            } => {
                if client_id.is_empty() {
                    return Err(DirectoryError::invalid(
                        "client_id is required for client_credentials grant",
                    ));
                }
                Ok(vec![
                    ("grant_type", "client_credentials".to_string()),
                    ("client_id", client_id.clone()),
                    ("client_secret", client_secret.clone()),
                ])
            }
        }
    }

    /// Grant type name.
    #[must_use]
    pub const fn grant_type(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::ClientCredentials { .. } => "client_credentials",
        }
    }
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password {
                client_id,
                username,
                ..
            } => f
                .debug_struct("Password")
                .field("client_id", client_id)
                .field("username", username)
                .finish_non_exhaustive(),
            Self::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type (normally `Bearer`).
    #[serde(default)]
    pub token_type: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,
    /// Refresh token, if issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Decoded view of a JWT.
#[derive(Debug, Clone, Serialize)]
pub struct TokenInspection {
    /// JOSE header.
    pub header: Map<String, Value>,
    /// Claims.
    pub claims: Map<String, Value>,
    /// `iat` claim.
    pub issued_at: Option<DateTime<Utc>>,
    /// `exp` claim.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether `exp` lies before the inspection instant.
    pub expired: bool,
}

impl TokenInspection {
    /// Gets a string claim.
    #[must_use]
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// Realm roles from the `realm_access` claim.
    #[must_use]
    pub fn realm_roles(&self) -> Vec<String> {
        self.claims
            .get("realm_access")
            .and_then(|v| v.get("roles"))
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Decodes a JWT without verifying it.
///
/// ## Errors
///
/// Returns `Invalid` if the token does not have three segments or a
/// segment is not base64url-encoded JSON.
pub fn inspect_token(token: &str, now: DateTime<Utc>) -> DirectoryResult<TokenInspection> {
    let token = token.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token);
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(DirectoryError::invalid(
            "invalid token format: expected 3 segments",
        ));
    }

    let header = decode_segment(parts[0], "header")?;
    let claims = decode_segment(parts[1], "payload")?;

    let issued_at = timestamp_claim(&claims, "iat");
    let expires_at = timestamp_claim(&claims, "exp");
    let expired = expires_at.is_some_and(|exp| exp <= now);

    Ok(TokenInspection {
        header,
        claims,
        issued_at,
        expires_at,
        expired,
    })
}

fn decode_segment(segment: &str, what: &str) -> DirectoryResult<Map<String, Value>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| DirectoryError::invalid(format!("failed to decode {what}: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DirectoryError::invalid(format!("failed to parse {what}: {e}")))
}

fn timestamp_claim(claims: &Map<String, Value>, name: &str) -> Option<DateTime<Utc>> {
    claims
        .get(name)
        .and_then(Value::as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
    }

    fn sample_token(exp: i64) -> String {
        let header = serde_json::json!({"alg": "RS256", "typ": "JWT"});
        let claims = serde_json::json!({
            "sub": "u1",
            "iat": exp - 300,
            "exp": exp,
            "realm_access": {"roles": ["viewer", "editor"]}
        });
        format!("{}.{}.signature", encode(&header), encode(&claims))
    }

    #[test]
    fn inspects_claims_and_expiry() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let live = inspect_token(&sample_token(1_700_000_100), now).unwrap();
        assert!(!live.expired);
        assert_eq!(live.claim_str("sub"), Some("u1"));
        assert_eq!(live.realm_roles(), vec!["viewer", "editor"]);
        assert_eq!(live.header.get("alg").and_then(Value::as_str), Some("RS256"));

        let stale = inspect_token(&format!("Bearer {}", sample_token(1_600_000_000)), now).unwrap();
        assert!(stale.expired);
    }

    #[test]
    fn rejects_malformed_tokens() {
        let now = Utc::now();
        assert!(inspect_token("not-a-jwt", now).is_err());
        assert!(inspect_token("a.b.c", now).is_err());
    }

    #[test]
    fn password_grant_defaults_client() {
        let grant = Grant::Password {
            client_id: None,
            username: "alice".to_string(),
            password: "pw".to_string(),
        };
        let form = grant.form().unwrap();
        assert!(form.contains(&("client_id", "admin-cli".to_string())));
        assert!(!format!("{grant:?}").contains("pw\""));
    }

    #[test]
    fn client_credentials_require_client_id() {
        let grant = Grant::ClientCredentials {
            client_id: String::new(),
            client_secret: "s".to_string(),
        };
        assert!(matches!(grant.form(), Err(DirectoryError::Invalid(_))));
    }
}

//! Authentication and authorization.
//!
//! Static bearer tokens: one shared admin key (`AGENT_ORCHESTRATOR_API_KEY`)
//! plus optional per-user tokens from configuration. Token issuance is out
//! of scope; runners and executors present the shared key.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// User role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sees only their own sessions.
    #[default]
    User,
    /// Sees all sessions, runners, and runs.
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// The authenticated caller, injected into request extensions.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this identity may read a session created by `created_by`.
    pub fn can_access(&self, created_by: &str) -> bool {
        self.is_admin() || self.user == created_by
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("malformed authorization header")]
    InvalidAuthHeader,

    #[error("unknown bearer token")]
    InvalidToken,
}

/// A configured per-user token.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct UserToken {
    pub token: String,
    pub user: String,
    #[serde(default)]
    pub role: Role,
}

/// Authentication state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    enabled: bool,
    admin_key: Option<String>,
    tokens: HashMap<String, Identity>,
}

impl AuthState {
    pub fn new(enabled: bool, admin_key: Option<String>, user_tokens: &[UserToken]) -> Self {
        let tokens = user_tokens
            .iter()
            .map(|entry| {
                (
                    entry.token.clone(),
                    Identity {
                        user: entry.user.clone(),
                        role: entry.role,
                    },
                )
            })
            .collect();

        Self {
            inner: Arc::new(AuthInner {
                enabled,
                admin_key,
                tokens,
            }),
        }
    }

    /// Auth disabled entirely (tests, trusted local deployments).
    pub fn disabled() -> Self {
        Self::new(false, None, &[])
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Resolve a bearer token to an identity.
    pub fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if self
            .inner
            .admin_key
            .as_deref()
            .is_some_and(|key| key == token)
        {
            return Ok(Identity {
                user: "admin".to_string(),
                role: Role::Admin,
            });
        }

        self.inner
            .tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

/// Extract a bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if token.is_empty() || parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

/// Axum middleware enforcing bearer auth and stamping the identity.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    if !auth.is_enabled() {
        request.extensions_mut().insert(Identity {
            user: "anonymous".to_string(),
            role: Role::Admin,
        });
        return next.run(request).await;
    }

    let identity = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingAuthHeader)
        .and_then(bearer_token_from_header)
        .and_then(|token| auth.authenticate(token));

    match identity {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => {
            warn!(error = %err, "rejected unauthenticated request");
            crate::api::ApiError::unauthorized(err.to_string()).into_response()
        }
    }
}

/// Handler extractor for the authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = crate::api::ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| crate::api::ApiError::unauthorized("no identity on request"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token_from_header("Bearer abc123").unwrap(), "abc123");
        assert_eq!(bearer_token_from_header("bearer abc123").unwrap(), "abc123");
        assert!(bearer_token_from_header("Basic abc123").is_err());
        assert!(bearer_token_from_header("Bearer").is_err());
        assert!(bearer_token_from_header("Bearer a b").is_err());
    }

    #[test]
    fn test_admin_key_wins() {
        let auth = AuthState::new(true, Some("topsecret".to_string()), &[]);
        let identity = auth.authenticate("topsecret").unwrap();
        assert!(identity.is_admin());
        assert!(auth.authenticate("other").is_err());
    }

    #[test]
    fn test_user_tokens() {
        let tokens = vec![UserToken {
            token: "alice-token".to_string(),
            user: "alice".to_string(),
            role: Role::User,
        }];
        let auth = AuthState::new(true, None, &tokens);

        let identity = auth.authenticate("alice-token").unwrap();
        assert_eq!(identity.user, "alice");
        assert!(!identity.is_admin());
        assert!(identity.can_access("alice"));
        assert!(!identity.can_access("bob"));
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("invalid".parse::<Role>().is_err());
    }
}

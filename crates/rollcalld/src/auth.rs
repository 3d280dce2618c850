//! Bearer-token sessions and the request extractors that enforce them.
//!
//! Login issues an opaque UUID token held in memory; sessions do not
//! survive a daemon restart.

use crate::accounts::Role;
use crate::http::{ApiError, AppState};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// The authenticated account behind a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account_id: i64,
    pub username: String,
    pub role: Role,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, AuthContext>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, ctx: AuthContext) -> Uuid {
        let token = Uuid::new_v4();
        self.lock().insert(token, ctx);
        token
    }

    pub fn revoke(&self, token: &Uuid) {
        self.lock().remove(token);
    }

    pub fn get(&self, token: &Uuid) -> Option<AuthContext> {
        self.lock().get(token).cloned()
    }

    /// Drop every session belonging to an account, e.g. after deletion.
    pub fn revoke_account(&self, account_id: i64) {
        self.lock().retain(|_, ctx| ctx.account_id != account_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, AuthContext>> {
        self.sessions.lock().expect("session store mutex poisoned")
    }
}

fn bearer_token(parts: &Parts) -> Result<Uuid, ApiError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing authorization header".into()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("expected bearer token".into()))?;
    Uuid::parse_str(token.trim())
        .map_err(|_| ApiError::Unauthorized("malformed session token".into()))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        state
            .sessions
            .get(&token)
            .ok_or_else(|| ApiError::Unauthorized("session expired or unknown".into()))
    }
}

/// Extractor that additionally requires the admin role.
pub struct AdminContext(pub AuthContext);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let ctx = AuthContext::from_request_parts(parts, state).await?;
        if ctx.role != Role::Admin {
            return Err(ApiError::Forbidden);
        }
        Ok(AdminContext(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: i64, username: &str, role: Role) -> AuthContext {
        AuthContext {
            account_id: id,
            username: username.to_string(),
            role,
        }
    }

    #[test]
    fn test_issue_and_revoke() {
        let store = SessionStore::new();
        let token = store.issue(ctx(1, "root", Role::Admin));
        assert_eq!(store.get(&token).unwrap().username, "root");

        store.revoke(&token);
        assert!(store.get(&token).is_none());
    }

    #[test]
    fn test_revoke_account_drops_all_sessions() {
        let store = SessionStore::new();
        let a = store.issue(ctx(1, "root", Role::Admin));
        let b = store.issue(ctx(1, "root", Role::Admin));
        let c = store.issue(ctx(2, "alice", Role::User));

        store.revoke_account(1);
        assert!(store.get(&a).is_none());
        assert!(store.get(&b).is_none());
        assert!(store.get(&c).is_some());
    }

    #[test]
    fn test_unknown_token_is_none() {
        let store = SessionStore::new();
        assert!(store.get(&Uuid::new_v4()).is_none());
    }
}

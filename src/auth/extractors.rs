use std::marker::PhantomData;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use tracing::{debug, warn};

use super::{
    claims::{AuthenticatedIdentity, Role},
    jwt::JwtKeys,
    services::{AuthError, INVALID_TOKEN, MISSING_TOKEN},
};
use crate::error::ApiError;

/// Reads `Authorization: Bearer <token>` and verifies it. Every token failure
/// collapses into one message; the concrete kind is only logged.
pub fn authenticate(headers: &HeaderMap, keys: &JwtKeys) -> Result<AuthenticatedIdentity, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::Unauthenticated(MISSING_TOKEN))?;

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Unauthenticated(MISSING_TOKEN))?;

    let claims = keys.verify(token).map_err(|e| {
        debug!(reason = %e, "bearer token rejected");
        AuthError::Unauthenticated(INVALID_TOKEN)
    })?;

    Ok(AuthenticatedIdentity::from(&claims))
}

/// Role membership check; ownership checks belong to resource handlers.
pub fn authorize(identity: &AuthenticatedIdentity, allowed: &[Role]) -> Result<(), AuthError> {
    if allowed.contains(&identity.role) {
        Ok(())
    } else {
        warn!(user_id = %identity.user_id, role = %identity.role, "role not permitted");
        Err(AuthError::Forbidden)
    }
}

/// Any authenticated caller.
pub struct AuthUser(pub AuthenticatedIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        Ok(AuthUser(authenticate(&parts.headers, &keys)?))
    }
}

/// Set of roles a route accepts.
pub trait RolePolicy {
    const ALLOWED: &'static [Role];
}

pub struct AdminOnly;

impl RolePolicy for AdminOnly {
    const ALLOWED: &'static [Role] = &[Role::Admin];
}

/// Authenticated caller whose role is in `P::ALLOWED`.
pub struct RequireRole<P>(pub AuthenticatedIdentity, PhantomData<fn() -> P>);

pub type AdminUser = RequireRole<AdminOnly>;

#[async_trait]
impl<S, P> FromRequestParts<S> for RequireRole<P>
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
    P: RolePolicy + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(identity) = AuthUser::from_request_parts(parts, state).await?;
        authorize(&identity, P::ALLOWED)?;
        Ok(RequireRole(identity, PhantomData))
    }
}

use std::sync::Arc;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::claims::{Claims, Role, TokenError};
use crate::{clock::Clock, config::JwtConfig, state::AppState};

/// Signing and verification keys plus the issuance policy.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::minutes(cfg.ttl_minutes),
            clock,
        }
    }

    /// Issues a token with the configured TTL.
    pub fn issue(&self, user_id: Uuid, role: Role) -> anyhow::Result<String> {
        self.issue_with_ttl(user_id, role, self.ttl)
    }

    pub fn issue_with_ttl(&self, user_id: Uuid, role: Role, ttl: Duration) -> anyhow::Result<String> {
        let now = self.clock.now();
        let exp = now + ttl;
        let claims = Claims {
            sub: user_id,
            role,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id = %user_id, role = %role, "jwt signed");
        Ok(token)
    }

    /// Signature is checked before the payload is decoded; expiry is checked
    /// against the injected clock rather than the library's wall clock.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            let kind = TokenError::from(e);
            debug!(error = %kind, "jwt rejected");
            kind
        })?;

        if self.clock.now().unix_timestamp() >= data.claims.exp {
            debug!(user_id = %data.claims.sub, "jwt expired");
            return Err(TokenError::Expired);
        }

        debug!(user_id = %data.claims.sub, role = %data.claims.role, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
pub(crate) fn test_keys(clock: Arc<dyn Clock>) -> JwtKeys {
    JwtKeys::new(
        &JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            ttl_minutes: 60 * 24,
        },
        clock,
    )
}

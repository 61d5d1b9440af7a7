use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    claims::Role,
    jwt::JwtKeys,
    password::CredentialHasher,
    policy::{self, PolicyViolation},
    repo::{StoreError, UserStore},
    repo_types::{NewUser, ProfileUpdate, PublicProfile, User, UserView},
};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Password does not meet requirements")]
    WeakPassword(Vec<PolicyViolation>),
    #[error("Email already registered")]
    EmailTaken,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Inactive user")]
    InactiveUser,
    #[error("User not found")]
    UserNotFound,
    #[error("{0}")]
    Unauthenticated(&'static str),
    #[error("Insufficient role")]
    Forbidden,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub(crate) const MISSING_TOKEN: &str = "Not authorized - no token provided";
pub(crate) const INVALID_TOKEN: &str = "Not authorized - invalid or expired token";

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// Register/login orchestration over the user store, hasher and token keys.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    hasher: CredentialHasher,
    keys: JwtKeys,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, hasher: CredentialHasher, keys: JwtKeys) -> Self {
        Self {
            users,
            hasher,
            keys,
        }
    }

    /// Error precedence: presence, mismatch, policy, uniqueness.
    pub async fn register(&self, reg: Registration) -> Result<String, AuthError> {
        if reg.first_name.trim().is_empty()
            || reg.last_name.trim().is_empty()
            || reg.email.trim().is_empty()
            || reg.password.is_empty()
            || reg.confirm_password.is_empty()
        {
            return Err(AuthError::InvalidInput("All fields are required".into()));
        }

        let email = normalize_email(&reg.email);
        if !is_valid_email(&email) {
            warn!(email = %email, "register with invalid email");
            return Err(AuthError::InvalidInput("Invalid email".into()));
        }

        if reg.password != reg.confirm_password {
            return Err(AuthError::PasswordMismatch);
        }

        let report = policy::validate(&reg.password);
        if !report.is_valid() {
            return Err(AuthError::WeakPassword(report.violations));
        }

        if self.users.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AuthError::EmailTaken);
        }

        let password_hash = self.hasher.hash(reg.password).await.map_err(|e| {
            error!(error = %e, "hash_password failed");
            e
        })?;

        let user = self
            .users
            .create(NewUser {
                first_name: reg.first_name.trim().to_string(),
                last_name: reg.last_name.trim().to_string(),
                email,
                password_hash,
                role: Role::User,
            })
            .await
            .map_err(|e| match e {
                // lost a race with a concurrent registration
                StoreError::DuplicateEmail => AuthError::EmailTaken,
                StoreError::Other(e) => {
                    error!(error = %e, "create user failed");
                    AuthError::Internal(e)
                }
            })?;

        let token = self.keys.issue(user.id, user.role)?;
        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(token)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<String, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput("All fields are required".into()));
        }

        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            self.hasher.verify_decoy(password.to_string()).await?;
            warn!(email = %email, "login unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let ok = self
            .hasher
            .verify(password.to_string(), user.password_hash.clone())
            .await?;
        if !ok {
            warn!(email = %email, user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.active {
            warn!(user_id = %user.id, "login by inactive user");
            return Err(AuthError::InactiveUser);
        }

        let token = self.keys.issue(user.id, user.role)?;
        info!(user_id = %user.id, email = %user.email, "user logged in");
        Ok(token)
    }

    /// Resolves a raw bearer token to the public view of its subject.
    pub async fn current_user(&self, token: &str) -> Result<UserView, AuthError> {
        let claims = self.keys.verify(token).map_err(|e| {
            warn!(error = %e, "current_user with rejected token");
            AuthError::Unauthenticated(INVALID_TOKEN)
        })?;
        self.profile(claims.sub).await
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<UserView, AuthError> {
        self.load(user_id).await.map(UserView::from)
    }

    pub async fn public_profile(&self, user_id: Uuid) -> Result<PublicProfile, AuthError> {
        self.load(user_id).await.map(PublicProfile::from)
    }

    pub async fn set_active(&self, user_id: Uuid, active: bool) -> Result<UserView, AuthError> {
        let user = self
            .users
            .set_active(user_id, active)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        info!(user_id = %user.id, active, "user active flag changed");
        Ok(user.into())
    }

    /// Same presence and email checks as registration; a taken email is
    /// EMAIL_TAKEN whether found up front or raised by the store.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> Result<UserView, AuthError> {
        if first_name.trim().is_empty() || last_name.trim().is_empty() || email.trim().is_empty() {
            return Err(AuthError::InvalidInput("All fields are required".into()));
        }
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidInput("Invalid email".into()));
        }

        let update = ProfileUpdate {
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            email,
        };
        let user = self
            .users
            .update_profile(user_id, update)
            .await
            .map_err(|e| match e {
                StoreError::DuplicateEmail => AuthError::EmailTaken,
                StoreError::Other(e) => {
                    error!(error = %e, "update profile failed");
                    AuthError::Internal(e)
                }
            })?
            .ok_or(AuthError::UserNotFound)?;

        info!(user_id = %user.id, "profile updated");
        Ok(user.into())
    }

    /// Precedence: presence, current password, policy.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if current_password.is_empty() || new_password.is_empty() {
            return Err(AuthError::InvalidInput("All fields are required".into()));
        }

        let user = self.load(user_id).await?;
        let ok = self
            .hasher
            .verify(current_password.to_string(), user.password_hash)
            .await?;
        if !ok {
            warn!(user_id = %user_id, "change password with wrong current password");
            return Err(AuthError::InvalidCredentials);
        }

        let report = policy::validate(new_password);
        if !report.is_valid() {
            return Err(AuthError::WeakPassword(report.violations));
        }

        let password_hash = self.hasher.hash(new_password.to_string()).await?;
        self.users
            .update_password(user_id, password_hash)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        info!(user_id = %user_id, "password changed");
        Ok(())
    }

    async fn load(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}

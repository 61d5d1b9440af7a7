use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::auth::{
    jwt::JwtKeys,
    password::CredentialHasher,
    repo::{PgUserStore, UserStore},
    services::AuthService,
};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::recipes::repo::{PgRecipeStore, RecipeStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: JwtKeys,
    pub auth: Arc<AuthService>,
    pub recipes: Arc<dyn RecipeStore>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        let users = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;
        let recipes = Arc::new(PgRecipeStore::new(db)) as Arc<dyn RecipeStore>;
        Self::from_parts(config, users, recipes, Arc::new(SystemClock))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        recipes: Arc<dyn RecipeStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let jwt = JwtKeys::new(&config.jwt, clock);
        let hasher = CredentialHasher::new(&config.hashing)?;
        let auth = Arc::new(AuthService::new(users, hasher, jwt.clone()));
        Ok(Self {
            config,
            jwt,
            auth,
            recipes,
        })
    }

    /// In-memory stores, a fixed secret and cheap hashing.
    #[cfg(test)]
    pub fn fake() -> (Self, Arc<crate::auth::repo::MemoryUserStore>) {
        Self::fake_with_recipes(Arc::new(crate::recipes::repo::MemoryRecipeStore::new()))
    }

    #[cfg(test)]
    pub fn fake_with_recipes(
        recipes: Arc<dyn RecipeStore>,
    ) -> (Self, Arc<crate::auth::repo::MemoryUserStore>) {
        use crate::auth::repo::MemoryUserStore;
        use crate::config::{HashConfig, JwtConfig};

        let config = Arc::new(AppConfig {
            database_url: "postgres://unused".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 60 * 24,
            },
            hashing: HashConfig {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
            },
        });
        let users = Arc::new(MemoryUserStore::new());
        let state = Self::from_parts(
            config,
            users.clone(),
            recipes,
            Arc::new(SystemClock),
        )
        .expect("fake state builds");
        (state, users)
    }
}

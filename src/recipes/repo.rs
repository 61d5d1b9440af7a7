use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Recipe {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub rating: f64,
    pub image_url: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub rating: f64,
    pub image_url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Latest,
    Oldest,
}

#[derive(Debug, Clone, Default)]
pub struct RecipeFilter {
    pub owner: Option<Uuid>,
    pub title_contains: Option<String>,
    pub category: Option<String>,
    pub min_rating: Option<f64>,
    pub sort: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait RecipeStore: Send + Sync {
    async fn create(&self, new: NewRecipe) -> anyhow::Result<Recipe>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Recipe>>;
    async fn list(&self, filter: &RecipeFilter) -> anyhow::Result<Vec<Recipe>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct PgRecipeStore {
    db: PgPool,
}

impl PgRecipeStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecipeStore for PgRecipeStore {
    async fn create(&self, new: NewRecipe) -> anyhow::Result<Recipe> {
        let recipe = sqlx::query_as::<_, Recipe>(
            r#"
            INSERT INTO recipes (id, user_id, title, description, category, rating, image_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, title, description, category, rating, image_url, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.category)
        .bind(new.rating)
        .bind(&new.image_url)
        .fetch_one(&self.db)
        .await
        .context("insert recipe")?;
        Ok(recipe)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Recipe>> {
        let recipe = sqlx::query_as::<_, Recipe>(
            r#"
            SELECT id, user_id, title, description, category, rating, image_url, created_at
            FROM recipes
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find recipe")?;
        Ok(recipe)
    }

    async fn list(&self, filter: &RecipeFilter) -> anyhow::Result<Vec<Recipe>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, user_id, title, description, category, rating, image_url, created_at \
             FROM recipes WHERE TRUE",
        );
        if let Some(owner) = filter.owner {
            qb.push(" AND user_id = ").push_bind(owner);
        }
        if let Some(q) = &filter.title_contains {
            qb.push(" AND strpos(lower(title), lower(")
                .push_bind(q.clone())
                .push(")) > 0");
        }
        if let Some(category) = &filter.category {
            qb.push(" AND lower(category) = lower(")
                .push_bind(category.clone())
                .push(")");
        }
        if let Some(min) = filter.min_rating {
            qb.push(" AND rating >= ").push_bind(min);
        }
        qb.push(match filter.sort {
            SortOrder::Latest => " ORDER BY created_at DESC",
            SortOrder::Oldest => " ORDER BY created_at ASC",
        });
        qb.push(" LIMIT ").push_bind(filter.limit);
        qb.push(" OFFSET ").push_bind(filter.offset);

        let rows = qb
            .build_query_as::<Recipe>()
            .fetch_all(&self.db)
            .await
            .context("list recipes")?;
        Ok(rows)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM recipes WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete recipe")?;
        Ok(res.rows_affected() > 0)
    }
}

/// In-process store; the sequence number breaks timestamp ties.
#[derive(Default)]
pub struct MemoryRecipeStore {
    recipes: DashMap<Uuid, (u64, Recipe)>,
    seq: AtomicU64,
}

impl MemoryRecipeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn passes(r: &Recipe, f: &RecipeFilter) -> bool {
    f.owner.map_or(true, |o| r.user_id == o)
        && f.title_contains
            .as_ref()
            .map_or(true, |q| r.title.to_lowercase().contains(&q.to_lowercase()))
        && f.category
            .as_ref()
            .map_or(true, |c| r.category.to_lowercase() == c.to_lowercase())
        && f.min_rating.map_or(true, |m| r.rating >= m)
}

#[async_trait]
impl RecipeStore for MemoryRecipeStore {
    async fn create(&self, new: NewRecipe) -> anyhow::Result<Recipe> {
        let recipe = Recipe {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            title: new.title,
            description: new.description,
            category: new.category,
            rating: new.rating,
            image_url: new.image_url,
            created_at: OffsetDateTime::now_utc(),
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.recipes.insert(recipe.id, (seq, recipe.clone()));
        Ok(recipe)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Recipe>> {
        Ok(self.recipes.get(&id).map(|e| e.value().1.clone()))
    }

    async fn list(&self, filter: &RecipeFilter) -> anyhow::Result<Vec<Recipe>> {
        let mut hits: Vec<(u64, Recipe)> = self
            .recipes
            .iter()
            .filter(|e| passes(&e.value().1, filter))
            .map(|e| e.value().clone())
            .collect();
        hits.sort_by(|a, b| (a.1.created_at, a.0).cmp(&(b.1.created_at, b.0)));
        if filter.sort == SortOrder::Latest {
            hits.reverse();
        }
        Ok(hits
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .map(|(_, r)| r)
            .collect())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.recipes.remove(&id).is_some())
    }
}

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{CreateRecipeRequest, RecipeList, RecipeQuery, RecipeResponse, DEFAULT_CATEGORY, MAX_LIMIT, MAX_RATING},
    repo::{NewRecipe, RecipeFilter, SortOrder},
};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    extract::{ApiJson, ApiPath, ApiQuery},
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/recipes", get(list_recipes))
        .route("/recipes/mine", get(my_recipes))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/recipes", post(create_recipe))
        .route("/recipes/:id", delete(delete_recipe))
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn validate(body: CreateRecipeRequest, owner: Uuid) -> ApiResult<NewRecipe> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("INVALID_INPUT", "Recipe title is required."));
    }
    let description = body.description.trim();
    if description.is_empty() {
        return Err(ApiError::bad_request(
            "INVALID_INPUT",
            "Recipe description is required.",
        ));
    }
    let rating = body.rating.unwrap_or(0.0);
    if !rating.is_finite() || !(0.0..=MAX_RATING).contains(&rating) {
        return Err(ApiError::bad_request(
            "INVALID_INPUT",
            "Rating must be between 0 and 5.",
        ));
    }

    Ok(NewRecipe {
        user_id: owner,
        title: title.to_string(),
        description: description.to_string(),
        category: non_blank(body.category).unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        rating,
        image_url: non_blank(body.image_url).unwrap_or_default(),
    })
}

#[instrument(skip(state, identity, body), fields(user_id = %identity.user_id))]
pub async fn create_recipe(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    ApiJson(body): ApiJson<CreateRecipeRequest>,
) -> ApiResult<(StatusCode, Json<RecipeResponse>)> {
    let new = validate(body, identity.user_id)?;
    let recipe = state.recipes.create(new).await?;
    info!(recipe_id = %recipe.id, "recipe created");
    Ok((StatusCode::CREATED, Json(recipe.into())))
}

#[instrument(skip(state))]
pub async fn list_recipes(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<RecipeQuery>,
) -> ApiResult<Json<RecipeList>> {
    let filter = RecipeFilter {
        owner: None,
        title_contains: non_blank(q.q),
        category: non_blank(q.category),
        min_rating: q.min_rating,
        sort: q.sort,
        limit: q.limit.clamp(1, MAX_LIMIT),
        offset: q.offset.max(0),
    };
    let recipes = state.recipes.list(&filter).await?;
    Ok(Json(RecipeList {
        recipes: recipes.into_iter().map(Into::into).collect(),
    }))
}

#[instrument(skip(state, identity), fields(user_id = %identity.user_id))]
pub async fn my_recipes(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<Json<RecipeList>> {
    let filter = RecipeFilter {
        owner: Some(identity.user_id),
        sort: SortOrder::Latest,
        limit: i64::MAX,
        ..Default::default()
    };
    let recipes = state.recipes.list(&filter).await?;
    Ok(Json(RecipeList {
        recipes: recipes.into_iter().map(Into::into).collect(),
    }))
}

/// Owners delete their own recipes; admins may delete any.
#[instrument(skip(state, identity), fields(user_id = %identity.user_id))]
pub async fn delete_recipe(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    let recipe = state
        .recipes
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("NOT_FOUND", "Recipe not found"))?;

    if !identity.may_manage(recipe.user_id) {
        warn!(recipe_id = %id, owner = %recipe.user_id, "delete of foreign recipe refused");
        return Err(ApiError::forbidden("Not allowed"));
    }

    if !state.recipes.delete(id).await? {
        warn!(recipe_id = %id, "recipe vanished before delete");
        return Err(ApiError::not_found("NOT_FOUND", "Recipe not found"));
    }
    info!(recipe_id = %id, by_admin = identity.user_id != recipe.user_id, "recipe deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(title: &str, description: &str) -> CreateRecipeRequest {
        CreateRecipeRequest {
            title: title.into(),
            description: description.into(),
            category: None,
            rating: None,
            image_url: None,
        }
    }

    #[test]
    fn validate_applies_defaults_and_trims() {
        let owner = Uuid::new_v4();
        let new = validate(body("  Soup ", " Hot "), owner).unwrap();
        assert_eq!(new.title, "Soup");
        assert_eq!(new.description, "Hot");
        assert_eq!(new.category, DEFAULT_CATEGORY);
        assert_eq!(new.rating, 0.0);
        assert_eq!(new.image_url, "");
        assert_eq!(new.user_id, owner);
    }

    #[test]
    fn validate_rejects_blank_fields_and_bad_rating() {
        let owner = Uuid::new_v4();
        assert!(validate(body(" ", "x"), owner).is_err());
        assert!(validate(body("x", ""), owner).is_err());

        let mut b = body("x", "y");
        b.rating = Some(7.0);
        assert!(validate(b, owner).is_err());

        let mut b = body("x", "y");
        b.rating = Some(f64::NAN);
        assert!(validate(b, owner).is_err());
    }
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::list_ops::{insert_at, move_item, remove_at, reindex, ListOpError, Positioned};
use super::models::{
    decode_list, encode_list, AddFaqRequest, AddIngredientRequest, CreateProductRequest,
    Ingredient, ListKind, MoveItemRequest, Product, ProductFaq, ProductQuery, UpdateProductRequest,
};
use crate::forms::clean;
use crate::security::auth::AuthUser;
use crate::security::validation::Validator;
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::products;
use crate::shared::state::AppState;
use crate::shared::utils::interact;

pub fn configure_products_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/products", get(list_products).post(create_product))
        .route(
            "/api/products/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/api/products/:id/faqs", post(add_faq))
        .route("/api/products/:id/faqs/move", post(move_faq))
        .route("/api/products/:id/faqs/:index", delete(remove_faq))
        .route("/api/products/:id/ingredients", post(add_ingredient))
        .route("/api/products/:id/ingredients/move", post(move_ingredient))
        .route("/api/products/:id/ingredients/:index", delete(remove_ingredient))
}

fn validate_price(price: &bigdecimal::BigDecimal) -> CrmResult<()> {
    Validator::new()
        .range(Some(price.clone()), "price", Some(bigdecimal::BigDecimal::from(0)), None)
        .validate()?;
    Ok(())
}

async fn list_products(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ProductQuery>,
) -> CrmResult<Json<Vec<Product>>> {
    let org_id = user.org_id;
    let rows = interact(&state.conn, move |conn| {
        let mut q = products::table
            .filter(products::org_id.eq(org_id))
            .select(Product::as_select())
            .into_boxed();
        if query.active_only {
            q = q.filter(products::is_active.eq(true));
        }
        if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            q = q.filter(products::name.ilike(format!("%{term}%")));
        }
        let rows = q.order(products::name.asc()).load(conn)?;
        Ok(rows)
    })
    .await?;
    Ok(Json(rows))
}

async fn create_product(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateProductRequest>,
) -> CrmResult<(StatusCode, Json<Product>)> {
    Validator::new()
        .string_required(&req.name, "name")
        .length(&req.name, "name", Some(2), Some(160))
        .validate()?;
    validate_price(&req.price)?;

    let mut faqs = req.faqs;
    let mut ingredients = req.ingredients;
    reindex(&mut faqs);
    reindex(&mut ingredients);

    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4(),
        org_id: user.org_id,
        name: req.name.trim().to_string(),
        description: clean(req.description),
        price: req.price,
        currency: req.currency.unwrap_or_else(|| "BRL".to_string()),
        image_url: clean(req.image_url),
        is_active: req.is_active.unwrap_or(true),
        faqs: encode_list(&faqs)?,
        ingredients: encode_list(&ingredients)?,
        created_at: now,
        updated_at: now,
    };

    let created = interact(&state.conn, move |conn| {
        let row = diesel::insert_into(products::table)
            .values(&product)
            .returning(Product::as_returning())
            .get_result(conn)?;
        Ok(row)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_product(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<Json<Product>> {
    let org_id = user.org_id;
    let product = interact(&state.conn, move |conn| {
        products::table
            .filter(products::id.eq(id))
            .filter(products::org_id.eq(org_id))
            .select(Product::as_select())
            .first(conn)
            .optional()?
            .ok_or(CrmError::not_found("Product"))
    })
    .await?;
    Ok(Json(product))
}

async fn update_product(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(mut req): Json<UpdateProductRequest>,
) -> CrmResult<Json<Product>> {
    if let Some(name) = &req.name {
        Validator::new()
            .string_required(name, "name")
            .length(name, "name", Some(2), Some(160))
            .validate()?;
    }
    if let Some(price) = &req.price {
        validate_price(price)?;
    }
    req.updated_at = Some(Utc::now());
    let org_id = user.org_id;

    let product = interact(&state.conn, move |conn| {
        diesel::update(
            products::table
                .filter(products::id.eq(id))
                .filter(products::org_id.eq(org_id)),
        )
        .set(&req)
        .returning(Product::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or(CrmError::not_found("Product"))
    })
    .await?;
    Ok(Json(product))
}

async fn delete_product(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> CrmResult<StatusCode> {
    let org_id = user.org_id;
    interact(&state.conn, move |conn| {
        let deleted = diesel::delete(
            products::table
                .filter(products::id.eq(id))
                .filter(products::org_id.eq(org_id)),
        )
        .execute(conn)?;
        if deleted == 0 {
            return Err(CrmError::not_found("Product"));
        }
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Read-modify-write of one embedded list under a row lock so concurrent
/// edits of the same product do not lose items.
async fn mutate_list<T, F>(
    state: &AppState,
    org_id: Uuid,
    id: Uuid,
    kind: ListKind,
    op: F,
) -> CrmResult<Product>
where
    T: Positioned + Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce(&mut Vec<T>) -> Result<(), ListOpError> + Send + 'static,
{
    interact(&state.conn, move |conn| {
        conn.transaction::<_, CrmError, _>(|conn| {
            let product: Product = products::table
                .filter(products::id.eq(id))
                .filter(products::org_id.eq(org_id))
                .select(Product::as_select())
                .for_update()
                .first(conn)
                .optional()?
                .ok_or(CrmError::not_found("Product"))?;

            let mut items: Vec<T> = decode_list(kind.column(&product))?;
            op(&mut items)?;
            let encoded = encode_list(&items)?;

            let target = products::table.find(product.id);
            let now = Utc::now();
            let updated = match kind {
                ListKind::Faqs => diesel::update(target)
                    .set((products::faqs.eq(encoded), products::updated_at.eq(now)))
                    .returning(Product::as_returning())
                    .get_result(conn)?,
                ListKind::Ingredients => diesel::update(target)
                    .set((products::ingredients.eq(encoded), products::updated_at.eq(now)))
                    .returning(Product::as_returning())
                    .get_result(conn)?,
            };
            Ok(updated)
        })
    })
    .await
}

async fn add_faq(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AddFaqRequest>,
) -> CrmResult<Json<Product>> {
    Validator::new()
        .string_required(&req.question, "question")
        .string_required(&req.answer, "answer")
        .validate()?;

    let faq = ProductFaq {
        question: req.question.trim().to_string(),
        answer: req.answer.trim().to_string(),
        position: 0,
    };
    let index = req.index;
    let product = mutate_list(&state, user.org_id, id, ListKind::Faqs, move |items| {
        insert_at(items, index, faq)
    })
    .await?;
    Ok(Json(product))
}

async fn remove_faq(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, index)): Path<(Uuid, usize)>,
) -> CrmResult<Json<Product>> {
    let product = mutate_list::<ProductFaq, _>(&state, user.org_id, id, ListKind::Faqs, move |items| {
        remove_at(items, index).map(|_| ())
    })
    .await?;
    Ok(Json(product))
}

async fn move_faq(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<MoveItemRequest>,
) -> CrmResult<Json<Product>> {
    let product = mutate_list::<ProductFaq, _>(&state, user.org_id, id, ListKind::Faqs, move |items| {
        move_item(items, req.from, req.to)
    })
    .await?;
    Ok(Json(product))
}

async fn add_ingredient(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<AddIngredientRequest>,
) -> CrmResult<Json<Product>> {
    Validator::new()
        .string_required(&req.name, "name")
        .length(&req.name, "name", None, Some(120))
        .validate()?;

    let ingredient = Ingredient {
        name: req.name.trim().to_string(),
        quantity: clean(req.quantity),
        position: 0,
    };
    let index = req.index;
    let product = mutate_list(&state, user.org_id, id, ListKind::Ingredients, move |items| {
        insert_at(items, index, ingredient)
    })
    .await?;
    Ok(Json(product))
}

async fn remove_ingredient(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, index)): Path<(Uuid, usize)>,
) -> CrmResult<Json<Product>> {
    let product = mutate_list::<Ingredient, _>(
        &state,
        user.org_id,
        id,
        ListKind::Ingredients,
        move |items| remove_at(items, index).map(|_| ()),
    )
    .await?;
    Ok(Json(product))
}

async fn move_ingredient(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<MoveItemRequest>,
) -> CrmResult<Json<Product>> {
    let product = mutate_list::<Ingredient, _>(
        &state,
        user.org_id,
        id,
        ListKind::Ingredients,
        move |items| move_item(items, req.from, req.to),
    )
    .await?;
    Ok(Json(product))
}

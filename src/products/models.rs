use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use super::list_ops::{normalize, Positioned};
use crate::shared::error::{CrmError, CrmResult};
use crate::shared::schema::products;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = products)]
pub struct Product {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: BigDecimal,
    pub currency: String,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub faqs: serde_json::Value,
    pub ingredients: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFaq {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub quantity: Option<String>,
    #[serde(default)]
    pub position: i32,
}

impl Positioned for ProductFaq {
    fn position(&self) -> i32 {
        self.position
    }
    fn set_position(&mut self, position: i32) {
        self.position = position;
    }
}

impl Positioned for Ingredient {
    fn position(&self) -> i32 {
        self.position
    }
    fn set_position(&mut self, position: i32) {
        self.position = position;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Faqs,
    Ingredients,
}

impl ListKind {
    pub fn column<'a>(&self, product: &'a Product) -> &'a serde_json::Value {
        match self {
            Self::Faqs => &product.faqs,
            Self::Ingredients => &product.ingredients,
        }
    }
}

/// Decodes a stored JSON array, treating `null` as empty.
pub fn decode_list<T: Positioned + DeserializeOwned>(value: &serde_json::Value) -> CrmResult<Vec<T>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let mut items: Vec<T> = serde_json::from_value(value.clone())
        .map_err(|e| CrmError::Internal(format!("Corrupt product list: {e}")))?;
    normalize(&mut items);
    Ok(items)
}

pub fn encode_list<T: Serialize>(items: &[T]) -> CrmResult<serde_json::Value> {
    serde_json::to_value(items).map_err(|e| CrmError::Internal(format!("Failed to encode list: {e}")))
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: BigDecimal,
    pub currency: Option<String>,
    pub image_url: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub faqs: Vec<ProductFaq>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = products)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<BigDecimal>,
    pub currency: Option<String>,
    pub image_url: Option<String>,
    pub is_active: Option<bool>,
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    #[serde(default)]
    pub active_only: bool,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddFaqRequest {
    pub question: String,
    pub answer: String,
    pub index: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AddIngredientRequest {
    pub name: String,
    pub quantity: Option<String>,
    pub index: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct MoveItemRequest {
    pub from: usize,
    pub to: usize,
}

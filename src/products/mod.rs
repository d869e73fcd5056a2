pub mod api;
pub mod list_ops;
pub mod models;

pub use api::configure_products_routes;
pub use models::{Ingredient, Product, ProductFaq};

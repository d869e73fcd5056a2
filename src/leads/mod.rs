pub mod api;
#[cfg(test)]
pub mod memory;
pub mod models;
pub mod service;
pub mod store;

pub use api::configure_leads_routes;
pub use models::{Lead, LeadStageHistory};
pub use store::{LeadStore, PgLeadStore};

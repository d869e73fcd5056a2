//! Multi-tenant sales CRM backend: lead funnel, follow-ups, products,
//! finance, teams, receptive attendance, WhatsApp messaging, subscriptions
//! and uploads, served over HTTP with axum on Postgres.

pub mod core;
pub use core::shared;

pub mod attendance;
pub mod auth;
pub mod billing;
pub mod email;
pub mod finance;
pub mod followups;
pub mod forms;
pub mod funnel;
pub mod leads;
pub mod main_module;
pub mod products;
pub mod security;
pub mod storage;
pub mod teams;
pub mod whatsapp;

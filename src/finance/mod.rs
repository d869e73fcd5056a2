//! Payment methods, receivables and the financial dashboard.

pub mod dashboard;
pub mod payment_methods;
pub mod receivables;

use axum::Router;
use std::sync::Arc;

use crate::shared::state::AppState;

pub use dashboard::{summarize, FinanceSummary};
pub use payment_methods::{PaymentKind, PaymentMethod};
pub use receivables::Receivable;

pub fn configure_finance_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(payment_methods::configure_payment_method_routes())
        .merge(receivables::configure_receivable_routes())
}

//! Financial dashboard aggregation over a tenant's receivables.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::payment_methods::PaymentMethod;
use super::receivables::Receivable;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodTotal {
    pub payment_method_id: Option<Uuid>,
    pub name: String,
    pub received: BigDecimal,
    pub pending: BigDecimal,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthTotal {
    pub month: String,
    pub received: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinanceSummary {
    pub today: NaiveDate,
    pub total_received: BigDecimal,
    pub total_pending: BigDecimal,
    pub total_overdue: BigDecimal,
    pub overdue_count: usize,
    pub by_method: Vec<MethodTotal>,
    pub monthly_received: Vec<MonthTotal>,
}

const UNASSIGNED_METHOD: &str = "Unassigned";

/// Pending includes overdue. A receivable is overdue when it is unpaid and
/// its due date is strictly before `today`. Monthly totals are keyed by the
/// month of payment.
pub fn summarize(receivables: &[Receivable], methods: &[PaymentMethod], today: NaiveDate) -> FinanceSummary {
    let zero = BigDecimal::from(0);
    let names: HashMap<Uuid, &str> = methods.iter().map(|m| (m.id, m.name.as_str())).collect();

    let mut total_received = zero.clone();
    let mut total_pending = zero.clone();
    let mut total_overdue = zero.clone();
    let mut overdue_count = 0;
    let mut by_method: BTreeMap<Option<Uuid>, MethodTotal> = BTreeMap::new();
    let mut monthly: BTreeMap<String, BigDecimal> = BTreeMap::new();

    for receivable in receivables {
        let entry = by_method
            .entry(receivable.payment_method_id)
            .or_insert_with(|| MethodTotal {
                payment_method_id: receivable.payment_method_id,
                name: receivable
                    .payment_method_id
                    .and_then(|id| names.get(&id).copied())
                    .unwrap_or(UNASSIGNED_METHOD)
                    .to_string(),
                received: zero.clone(),
                pending: zero.clone(),
                count: 0,
            });
        entry.count += 1;

        match receivable.paid_at {
            Some(paid_at) => {
                total_received += &receivable.amount;
                entry.received += &receivable.amount;
                let month = paid_at.format("%Y-%m").to_string();
                *monthly.entry(month).or_insert_with(|| zero.clone()) += &receivable.amount;
            }
            None => {
                total_pending += &receivable.amount;
                entry.pending += &receivable.amount;
                if receivable.is_overdue(today) {
                    total_overdue += &receivable.amount;
                    overdue_count += 1;
                }
            }
        }
    }

    let mut by_method: Vec<MethodTotal> = by_method.into_values().collect();
    by_method.sort_by(|a, b| b.received.cmp(&a.received).then_with(|| a.name.cmp(&b.name)));

    FinanceSummary {
        today,
        total_received,
        total_pending,
        total_overdue,
        overdue_count,
        by_method,
        monthly_received: monthly
            .into_iter()
            .map(|(month, received)| MonthTotal { month, received })
            .collect(),
    }
}

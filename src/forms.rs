//! Request schemas for login, signup and lead creation.

use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::funnel::LeadStage;
use crate::security::validation::{ValidationError, ValidationResult, Validator};
use crate::shared::utils::normalize_phone;

#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    /// Slug of the organization to sign into when the user belongs to more
    /// than one. Defaults to the oldest membership.
    #[serde(default)]
    pub organization: Option<String>,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), ValidationResult> {
        Validator::new()
            .string_required(&self.email, "email")
            .email(&self.email)
            .string_required(&self.password, "password")
            .validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignupForm {
    pub organization_name: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

impl SignupForm {
    pub fn validate(&self) -> Result<(), ValidationResult> {
        Validator::new()
            .string_required(&self.organization_name, "organization_name")
            .length(&self.organization_name, "organization_name", Some(2), Some(120))
            .string_required(&self.full_name, "full_name")
            .length(&self.full_name, "full_name", Some(2), Some(120))
            .email(&self.email)
            .password(&self.password)
            .custom(|| {
                (self.password != self.password_confirmation).then(|| ValidationError::Mismatch {
                    field: "password_confirmation".to_string(),
                    other: "password".to_string(),
                })
            })
            .validate()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadForm {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub stage: Option<LeadStage>,
    #[serde(default)]
    pub rating: i16,
    pub assigned_to: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub negotiated_value: Option<BigDecimal>,
    pub payment_method_id: Option<Uuid>,
    pub installments: Option<i32>,
    pub notes: Option<String>,
    pub source: Option<String>,
}

pub const MAX_RATING: i16 = 5;
pub const MAX_INSTALLMENTS: i32 = 48;

impl LeadForm {
    pub fn validate(&self) -> Result<(), ValidationResult> {
        Validator::new()
            .string_required(&self.name, "name")
            .length(&self.name, "name", Some(2), Some(120))
            .optional_email(self.email.as_deref())
            .optional_phone(self.phone.as_deref())
            .range(Some(self.rating), "rating", Some(0), Some(MAX_RATING))
            .range(self.installments, "installments", Some(1), Some(MAX_INSTALLMENTS))
            .range(
                self.negotiated_value.clone(),
                "negotiated_value",
                Some(BigDecimal::from(0)),
                None,
            )
            .validate()
    }

    /// Trims text fields, drops blank optionals and keeps only the digits of
    /// the phone number.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.email = clean(self.email).map(|e| e.to_lowercase());
        self.phone = clean(self.phone).map(|p| normalize_phone(&p));
        self.notes = clean(self.notes);
        self.source = clean(self.source);
        self
    }
}

pub fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

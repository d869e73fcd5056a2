pub mod auth;
pub mod cors;
pub mod jwt;
pub mod password;
pub mod validation;
pub mod webhook;

pub use auth::{AuthUser, MemberRole};
pub use cors::create_cors_layer;
pub use jwt::{extract_bearer_token, Claims, JwtManager, TokenPair, TokenType};
pub use password::{hash_password, verify_password};
pub use validation::{ValidationError, ValidationResult, Validator};

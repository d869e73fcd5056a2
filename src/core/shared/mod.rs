pub mod error;
pub mod schema;
pub mod state;
#[cfg(test)]
pub mod test_utils;
pub mod utils;

pub use error::{CrmError, CrmResult};
pub use schema::*;
pub use utils::{create_conn, interact, DbPool};

pub mod prelude {
    pub use super::schema::*;
    pub use super::{CrmError, CrmResult, DbPool};

    pub use diesel::prelude::*;

    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use uuid::Uuid;
}

use serde::{Deserialize, Serialize};

/// A shopper. `referred_by` is fixed at signup and never re-parented.
#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub referred_by: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, referred_by: Option<String>) -> Self {
        Self {
            id: id.into(),
            referred_by,
            created_at: chrono::Utc::now(),
        }
    }
}

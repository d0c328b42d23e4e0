use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Business {
    pub id: String,
    pub stripe_account_id: Option<String>,
    pub details_submitted: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
}

impl Business {
    /// A business that has not started processor onboarding yet.
    pub fn new(id: impl Into<String>, stripe_account_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            stripe_account_id,
            details_submitted: false,
            charges_enabled: false,
            payouts_enabled: false,
        }
    }
}

/// Onboarding flags reported by an `account.updated` event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountUpdate {
    pub stripe_account_id: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
}

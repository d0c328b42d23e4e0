use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

/// A settled payment. Keyed by `payment_id`, which is unique across the ledger.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Transaction {
    pub id: String,
    pub payment_id: String,
    pub user_id: String,
    pub business_id: String,
    pub wallet_id: String,
    pub amount: Decimal,
    pub cashback_earned: Decimal,
    pub referrer_id: Option<String>,
    pub referral_reward: Option<Decimal>,
    pub status: TransactionStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, Debug)]
pub struct NewTransaction {
    pub payment_id: String,
    pub user_id: String,
    pub business_id: String,
    pub wallet_id: String,
    pub amount: Decimal,
    pub cashback_earned: Decimal,
    pub referrer_id: Option<String>,
    pub referral_reward: Option<Decimal>,
    pub status: TransactionStatus,
}

impl NewTransaction {
    pub fn into_transaction(self, id: String) -> Transaction {
        Transaction {
            id,
            payment_id: self.payment_id,
            user_id: self.user_id,
            business_id: self.business_id,
            wallet_id: self.wallet_id,
            amount: self.amount,
            cashback_earned: self.cashback_earned,
            referrer_id: self.referrer_id,
            referral_reward: self.referral_reward,
            status: self.status,
            created_at: chrono::Utc::now(),
        }
    }
}

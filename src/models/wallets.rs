use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Wallet {
    pub id: String,
    pub user_id: String,
    pub business_id: String,
    pub balance: Decimal,
    pub balance_from_referrals: Decimal,
}

/// Identifies the single wallet a user may hold at a business.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalletKey {
    pub user_id: String,
    pub business_id: String,
}

impl WalletKey {
    pub fn new(user_id: &str, business_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            business_id: business_id.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceChange {
    Increment(Decimal),
    Set(Decimal),
}

/// Applied by `upsert_wallet`. A missing wallet is created with the change
/// applied to zero balances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalletUpdate {
    pub balance: BalanceChange,
    pub referral_delta: Decimal,
}

impl WalletUpdate {
    pub fn set_balance(balance: Decimal) -> Self {
        Self {
            balance: BalanceChange::Set(balance),
            referral_delta: Decimal::ZERO,
        }
    }

    pub fn referral_credit(reward: Decimal) -> Self {
        Self {
            balance: BalanceChange::Increment(Decimal::ZERO),
            referral_delta: reward,
        }
    }

    pub fn apply_to(&self, balance: Decimal, balance_from_referrals: Decimal) -> (Decimal, Decimal) {
        let balance = match self.balance {
            BalanceChange::Increment(delta) => balance + delta,
            BalanceChange::Set(value) => value,
        };

        (balance, balance_from_referrals + self.referral_delta)
    }
}

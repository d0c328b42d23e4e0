//! In-process [`LedgerStore`] backed by a mutex-guarded map set.
//!
//! A transaction holds the lock for its whole lifetime and works on a staged
//! copy of the state, so dropping it without committing leaves no trace.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{LedgerStore, LedgerTransaction, RepositoryError};
use crate::models::{
    businesses::{AccountUpdate, Business},
    transactions::{NewTransaction, Transaction, TransactionStatus},
    users::User,
    wallets::{Wallet, WalletKey, WalletUpdate},
};

#[derive(Clone, Default)]
struct MemoryState {
    users: HashMap<String, User>,
    businesses: HashMap<String, Business>,
    wallets: HashMap<WalletKey, Wallet>,
    transactions: Vec<Transaction>,
}

impl MemoryState {
    fn sum_cashback_earned(&self, key: &WalletKey) -> Decimal {
        self.transactions
            .iter()
            .filter(|t| {
                t.user_id == key.user_id
                    && t.business_id == key.business_id
                    && t.status == TransactionStatus::Completed
            })
            .map(|t| t.cashback_earned)
            .sum()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id.clone(), user);
    }

    pub async fn insert_business(&self, business: Business) {
        self.state
            .lock()
            .await
            .businesses
            .insert(business.id.clone(), business);
    }

    /// Stores a wallet as-is, bypassing settlement. Lets tests start from a
    /// wallet whose balance has drifted from the ledger.
    pub async fn put_wallet(&self, wallet: Wallet) {
        let key = WalletKey::new(&wallet.user_id, &wallet.business_id);
        self.state.lock().await.wallets.insert(key, wallet);
    }

    /// Appends a ledger row as-is, e.g. a `pending` row written before
    /// settlement confirmed the payment.
    pub async fn put_transaction(&self, transaction: Transaction) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state
            .transactions
            .iter()
            .any(|t| t.payment_id == transaction.payment_id)
        {
            return Err(RepositoryError::Duplicate(transaction.payment_id));
        }
        state.transactions.push(transaction);
        Ok(())
    }

    pub async fn business(&self, business_id: &str) -> Option<Business> {
        self.state.lock().await.businesses.get(business_id).cloned()
    }

    pub async fn wallet(&self, user_id: &str, business_id: &str) -> Option<Wallet> {
        let key = WalletKey::new(user_id, business_id);
        self.state.lock().await.wallets.get(&key).cloned()
    }

    pub async fn wallets(&self) -> Vec<Wallet> {
        self.state.lock().await.wallets.values().cloned().collect()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().await.transactions.clone()
    }

    pub async fn ledger_cashback(&self, user_id: &str, business_id: &str) -> Decimal {
        let key = WalletKey::new(user_id, business_id);
        self.state.lock().await.sum_cashback_earned(&key)
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, RepositoryError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = (*guard).clone();

        Ok(MemoryTransaction { guard, staged })
    }

    async fn mark_transaction_failed(&self, payment_id: &str) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let row = state
            .transactions
            .iter_mut()
            .find(|t| t.payment_id == payment_id && t.status == TransactionStatus::Pending);

        match row {
            Some(row) => {
                row.status = TransactionStatus::Failed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_business_onboarding(
        &self,
        update: &AccountUpdate,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let business = state
            .businesses
            .values_mut()
            .find(|b| b.stripe_account_id.as_deref() == Some(update.stripe_account_id.as_str()));

        match business {
            Some(business) => {
                business.details_submitted = true;
                business.charges_enabled = update.charges_enabled;
                business.payouts_enabled = update.payouts_enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn lock_wallets(&mut self, _keys: &[WalletKey]) -> Result<(), RepositoryError> {
        // The whole store is already held exclusively.
        Ok(())
    }

    async fn find_user(&mut self, user_id: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self.staged.users.get(user_id).cloned())
    }

    async fn business_exists(&mut self, business_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.staged.businesses.contains_key(business_id))
    }

    async fn find_transaction(
        &mut self,
        payment_id: &str,
    ) -> Result<Option<Transaction>, RepositoryError> {
        Ok(self
            .staged
            .transactions
            .iter()
            .find(|t| t.payment_id == payment_id)
            .cloned())
    }

    async fn sum_cashback_earned(&mut self, key: &WalletKey) -> Result<Decimal, RepositoryError> {
        Ok(self.staged.sum_cashback_earned(key))
    }

    async fn get_wallet(&mut self, key: &WalletKey) -> Result<Option<Wallet>, RepositoryError> {
        Ok(self.staged.wallets.get(key).cloned())
    }

    async fn upsert_wallet(
        &mut self,
        key: &WalletKey,
        update: WalletUpdate,
    ) -> Result<Wallet, RepositoryError> {
        let wallet = self.staged.wallets.entry(key.clone()).or_insert_with(|| Wallet {
            id: Uuid::new_v4().hyphenated().to_string(),
            user_id: key.user_id.clone(),
            business_id: key.business_id.clone(),
            balance: Decimal::ZERO,
            balance_from_referrals: Decimal::ZERO,
        });

        let (balance, balance_from_referrals) =
            update.apply_to(wallet.balance, wallet.balance_from_referrals);
        wallet.balance = balance;
        wallet.balance_from_referrals = balance_from_referrals;

        Ok(wallet.clone())
    }

    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, RepositoryError> {
        if self
            .staged
            .transactions
            .iter()
            .any(|t| t.payment_id == transaction.payment_id)
        {
            return Err(RepositoryError::Duplicate(format!(
                "transactions.payment_id = {}",
                transaction.payment_id
            )));
        }

        let transaction = transaction.into_transaction(Uuid::new_v4().hyphenated().to_string());
        self.staged.transactions.push(transaction.clone());

        Ok(transaction)
    }

    async fn complete_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Option<Transaction>, RepositoryError> {
        let row = self.staged.transactions.iter_mut().find(|t| {
            t.payment_id == transaction.payment_id && t.status != TransactionStatus::Completed
        });

        Ok(row.map(|row| {
            let created_at = row.created_at;
            *row = Transaction {
                created_at,
                ..transaction.into_transaction(row.id.clone())
            };
            row.clone()
        }))
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        let MemoryTransaction { mut guard, staged } = self;
        *guard = staged;
        Ok(())
    }
}

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres};

use crate::models::{
    businesses::AccountUpdate,
    transactions::{NewTransaction, Transaction},
    users::User,
    wallets::{Wallet, WalletKey, WalletUpdate},
};

pub mod businesses;
pub mod memory;
pub mod transactions;
pub mod users;
pub mod wallets;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Duplicate: {0}")]
    Duplicate(String),
    #[error("Database error: {0}")]
    Database(sqlx::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Duplicate(db.message().to_string())
            }
            _ => RepositoryError::Database(e),
        }
    }
}

/// Durable home of wallets and the transaction ledger.
///
/// Settlement reads and writes go through a [`LedgerTransaction`]; nothing it
/// does is visible to other callers until [`LedgerTransaction::commit`].
#[async_trait]
pub trait LedgerStore: Clone + Send + Sync + 'static {
    type Tx: LedgerTransaction;

    async fn begin(&self) -> Result<Self::Tx, RepositoryError>;

    /// Moves a pending ledger row to `failed`. Returns whether a row changed.
    async fn mark_transaction_failed(&self, payment_id: &str) -> Result<bool, RepositoryError>;

    /// Returns whether a business with that processor account exists.
    async fn update_business_onboarding(
        &self,
        update: &AccountUpdate,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait LedgerTransaction: Send {
    /// Serializes writers of the given wallets until this transaction ends.
    /// Callers pass the keys sorted.
    async fn lock_wallets(&mut self, keys: &[WalletKey]) -> Result<(), RepositoryError>;

    async fn find_user(&mut self, user_id: &str) -> Result<Option<User>, RepositoryError>;

    async fn business_exists(&mut self, business_id: &str) -> Result<bool, RepositoryError>;

    async fn find_transaction(
        &mut self,
        payment_id: &str,
    ) -> Result<Option<Transaction>, RepositoryError>;

    /// Sum of `cashback_earned` over completed transactions for the wallet.
    async fn sum_cashback_earned(&mut self, key: &WalletKey) -> Result<Decimal, RepositoryError>;

    async fn get_wallet(&mut self, key: &WalletKey) -> Result<Option<Wallet>, RepositoryError>;

    async fn upsert_wallet(
        &mut self,
        key: &WalletKey,
        update: WalletUpdate,
    ) -> Result<Wallet, RepositoryError>;

    /// Fails with [`RepositoryError::Duplicate`] if the payment id is taken.
    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, RepositoryError>;

    /// Rewrites the `pending` or `failed` row of the payment as `transaction`.
    /// Returns `None` when no such row is left, i.e. the payment was completed
    /// by someone else in the meantime.
    async fn complete_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Option<Transaction>, RepositoryError>;

    async fn commit(self) -> Result<(), RepositoryError>;
}

#[derive(Clone)]
pub struct PgStore {
    conn: PgPool,
}

impl PgStore {
    pub fn new(conn: PgPool) -> Self {
        PgStore { conn }
    }
}

pub struct PgLedgerTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerStore for PgStore {
    type Tx = PgLedgerTransaction;

    async fn begin(&self) -> Result<Self::Tx, RepositoryError> {
        let tx = self.conn.begin().await?;
        Ok(PgLedgerTransaction { tx })
    }

    async fn mark_transaction_failed(&self, payment_id: &str) -> Result<bool, RepositoryError> {
        let mut conn = self.conn.acquire().await?;
        transactions::mark_failed(&mut conn, payment_id).await
    }

    async fn update_business_onboarding(
        &self,
        update: &AccountUpdate,
    ) -> Result<bool, RepositoryError> {
        let mut conn = self.conn.acquire().await?;
        businesses::update_onboarding(&mut conn, update).await
    }
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn lock_wallets(&mut self, keys: &[WalletKey]) -> Result<(), RepositoryError> {
        for key in keys {
            wallets::lock(&mut self.tx, key).await?;
        }
        Ok(())
    }

    async fn find_user(&mut self, user_id: &str) -> Result<Option<User>, RepositoryError> {
        users::find_by_id(&mut self.tx, user_id).await
    }

    async fn business_exists(&mut self, business_id: &str) -> Result<bool, RepositoryError> {
        businesses::exists(&mut self.tx, business_id).await
    }

    async fn find_transaction(
        &mut self,
        payment_id: &str,
    ) -> Result<Option<Transaction>, RepositoryError> {
        transactions::find_by_payment_id(&mut self.tx, payment_id).await
    }

    async fn sum_cashback_earned(&mut self, key: &WalletKey) -> Result<Decimal, RepositoryError> {
        transactions::sum_cashback_earned(&mut self.tx, key).await
    }

    async fn get_wallet(&mut self, key: &WalletKey) -> Result<Option<Wallet>, RepositoryError> {
        wallets::find(&mut self.tx, key).await
    }

    async fn upsert_wallet(
        &mut self,
        key: &WalletKey,
        update: WalletUpdate,
    ) -> Result<Wallet, RepositoryError> {
        wallets::upsert(&mut self.tx, key, update).await
    }

    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, RepositoryError> {
        transactions::insert(&mut self.tx, transaction).await
    }

    async fn complete_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Option<Transaction>, RepositoryError> {
        transactions::complete_unsettled(&mut self.tx, transaction).await
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }
}

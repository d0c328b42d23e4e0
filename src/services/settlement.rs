//! Turns a confirmed payment into ledger and wallet state, at most once per
//! payment id.
//!
//! One settlement runs inside a single store transaction:
//!
//! 1. bail out with [`SettlementResult::AlreadyProcessed`] if the payment id
//!    is already completed in the ledger; a `pending` or `failed` row for it
//!    is completed in place instead of inserting a new one;
//! 2. split the amount into platform fee, cashback and referral reward;
//! 3. credit the referrer's `balance_from_referrals` at the business;
//! 4. set the purchaser's `balance` to the ledger's cashback total plus this
//!    payment's cashback, which also repairs a wallet that drifted;
//! 5. write the ledger row and commit.
//!
//! A unique-constraint rejection of the ledger row means another delivery of
//! the same payment won the race; the transaction is dropped and the call
//! reports `AlreadyProcessed`.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::{
    businesses::AccountUpdate,
    transactions::{NewTransaction, Transaction, TransactionStatus},
    wallets::{WalletKey, WalletUpdate},
};
use crate::repositories::{LedgerStore, LedgerTransaction, RepositoryError};
use crate::rewards::RewardPolicy;

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("payment {0} has invalid amount {1}: {2}")]
    InvalidAmount(String, Decimal, &'static str),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("business not found: {0}")]
    BusinessNotFound(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Debug)]
pub struct Settlement {
    pub transaction: Transaction,
    /// Retained by the processor from the business's proceeds; not booked.
    pub platform_fee: Decimal,
    pub wallet_balance: Decimal,
}

#[derive(Clone, Debug)]
pub enum SettlementResult {
    Settled(Settlement),
    AlreadyProcessed { payment_id: String },
}

pub struct SettlementEngine<S> {
    store: S,
    policy: RewardPolicy,
}

impl<S: LedgerStore> SettlementEngine<S> {
    pub fn new(store: S, policy: RewardPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn settle(
        &self,
        payment_id: &str,
        amount: Decimal,
        business_id: &str,
        user_id: &str,
    ) -> Result<SettlementResult, SettlementError> {
        check_amount(payment_id, amount)?;

        let mut tx = self.store.begin().await?;

        let existing = tx.find_transaction(payment_id).await?;
        if existing
            .as_ref()
            .is_some_and(|t| t.status == TransactionStatus::Completed)
        {
            log::info!("Payment {} already settled, skipping.", payment_id);
            return Ok(already_processed(payment_id));
        }

        let user = tx
            .find_user(user_id)
            .await?
            .ok_or_else(|| SettlementError::UserNotFound(user_id.to_string()))?;
        if !tx.business_exists(business_id).await? {
            return Err(SettlementError::BusinessNotFound(business_id.to_string()));
        }

        let split = self
            .policy
            .split(amount, user.referred_by.is_some())
            .ok_or_else(|| {
                let reason = "too large to split";
                SettlementError::InvalidAmount(payment_id.to_string(), amount, reason)
            })?;
        let user_key = WalletKey::new(user_id, business_id);
        let referrer_key = user
            .referred_by
            .as_deref()
            .map(|referrer_id| WalletKey::new(referrer_id, business_id));

        let mut keys: Vec<WalletKey> = std::iter::once(user_key.clone())
            .chain(referrer_key.clone())
            .collect();
        keys.sort();
        keys.dedup();
        tx.lock_wallets(&keys).await?;

        if let (Some(referrer_key), Some(reward)) = (&referrer_key, split.referral_reward) {
            let wallet = tx
                .upsert_wallet(referrer_key, WalletUpdate::referral_credit(reward))
                .await?;
            log::debug!(
                "Credited referral reward {} to wallet {} of {}.",
                reward,
                wallet.id,
                referrer_key.user_id
            );
        }

        let ledger_cashback = tx.sum_cashback_earned(&user_key).await?;
        if let Some(current) = tx.get_wallet(&user_key).await? {
            if current.balance != ledger_cashback {
                log::warn!(
                    "Wallet {} balance {} drifted from ledger total {}, resetting.",
                    current.id,
                    current.balance,
                    ledger_cashback
                );
            }
        }
        let wallet = tx
            .upsert_wallet(
                &user_key,
                WalletUpdate::set_balance(ledger_cashback + split.cashback),
            )
            .await?;

        let record = NewTransaction {
            payment_id: payment_id.to_string(),
            user_id: user_id.to_string(),
            business_id: business_id.to_string(),
            wallet_id: wallet.id.clone(),
            amount,
            cashback_earned: split.cashback,
            referrer_id: user.referred_by.clone(),
            referral_reward: split.referral_reward,
            status: TransactionStatus::Completed,
        };

        let written = match existing {
            Some(previous) => {
                log::info!(
                    "Completing {} transaction {} for payment {}.",
                    previous.status,
                    previous.id,
                    payment_id
                );
                tx.complete_transaction(record).await?
            }
            None => match tx.insert_transaction(record).await {
                Ok(transaction) => Some(transaction),
                Err(RepositoryError::Duplicate(detail)) => {
                    log::info!("Payment {} inserted concurrently ({}).", payment_id, detail);
                    None
                }
                Err(e) => return Err(e.into()),
            },
        };

        let Some(transaction) = written else {
            log::info!(
                "Payment {} settled concurrently, discarding this attempt.",
                payment_id
            );
            return Ok(already_processed(payment_id));
        };

        match tx.commit().await {
            Ok(()) => {}
            Err(RepositoryError::Duplicate(_)) => return Ok(already_processed(payment_id)),
            Err(e) => return Err(e.into()),
        }

        log::info!(
            "Settled payment {}: amount {}, cashback {}, referral reward {:?}, platform fee {}, wallet {} balance {}.",
            payment_id,
            amount,
            split.cashback,
            split.referral_reward,
            split.platform_fee,
            wallet.id,
            wallet.balance
        );

        Ok(SettlementResult::Settled(Settlement {
            transaction,
            platform_fee: split.platform_fee,
            wallet_balance: wallet.balance,
        }))
    }

    /// Marks a pending ledger row as failed. Completed rows are left alone.
    pub async fn fail_payment(&self, payment_id: &str) -> Result<bool, SettlementError> {
        let changed = self.store.mark_transaction_failed(payment_id).await?;
        if changed {
            log::info!("Marked payment {} as failed.", payment_id);
        } else {
            log::info!("No pending transaction for failed payment {}.", payment_id);
        }

        Ok(changed)
    }

    pub async fn apply_account_update(&self, update: &AccountUpdate) -> Result<bool, SettlementError> {
        let found = self.store.update_business_onboarding(update).await?;
        if found {
            log::info!(
                "Updated onboarding for account {} (charges: {}, payouts: {}).",
                update.stripe_account_id,
                update.charges_enabled,
                update.payouts_enabled
            );
        } else {
            log::warn!("No business for processor account {}.", update.stripe_account_id);
        }

        Ok(found)
    }
}

/// Largest amount a `NUMERIC(12,2)` column holds.
fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999, 2)
}

fn check_amount(payment_id: &str, amount: Decimal) -> Result<(), SettlementError> {
    let reason = if amount <= Decimal::ZERO {
        "must be positive"
    } else if amount.normalize().scale() > 2 {
        "has fractions of a cent"
    } else if amount > max_amount() {
        "exceeds the largest storable amount"
    } else {
        return Ok(());
    };

    Err(SettlementError::InvalidAmount(
        payment_id.to_string(),
        amount,
        reason,
    ))
}

fn already_processed(payment_id: &str) -> SettlementResult {
    SettlementResult::AlreadyProcessed {
        payment_id: payment_id.to_string(),
    }
}

pub enum SettlementRequest {
    Settle {
        payment_id: String,
        amount: Decimal,
        business_id: String,
        user_id: String,
        response: oneshot::Sender<Result<SettlementResult, ServiceError>>,
    },
    FailPayment {
        payment_id: String,
        response: oneshot::Sender<Result<bool, ServiceError>>,
    },
    UpdateAccount {
        update: AccountUpdate,
        response: oneshot::Sender<Result<bool, ServiceError>>,
    },
}

pub struct SettlementRequestHandler<S> {
    engine: Arc<SettlementEngine<S>>,
}

impl<S> Clone for SettlementRequestHandler<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<S: LedgerStore> SettlementRequestHandler<S> {
    pub fn new(engine: Arc<SettlementEngine<S>>) -> Self {
        SettlementRequestHandler { engine }
    }
}

#[async_trait]
impl<S: LedgerStore> RequestHandler<SettlementRequest> for SettlementRequestHandler<S> {
    async fn handle_request(&self, request: SettlementRequest) {
        match request {
            SettlementRequest::Settle {
                payment_id,
                amount,
                business_id,
                user_id,
                response,
            } => {
                let result = self
                    .engine
                    .settle(&payment_id, amount, &business_id, &user_id)
                    .await
                    .map_err(ServiceError::from);
                if let Err(e) = &result {
                    log::error!("Settlement of payment {} failed: {}", payment_id, e);
                }
                let _ = response.send(result);
            }
            SettlementRequest::FailPayment {
                payment_id,
                response,
            } => {
                let result = self
                    .engine
                    .fail_payment(&payment_id)
                    .await
                    .map_err(ServiceError::from);
                let _ = response.send(result);
            }
            SettlementRequest::UpdateAccount { update, response } => {
                let result = self
                    .engine
                    .apply_account_update(&update)
                    .await
                    .map_err(ServiceError::from);
                let _ = response.send(result);
            }
        }
    }
}

pub struct SettlementService;

impl SettlementService {
    pub fn new() -> Self {
        SettlementService {}
    }
}

#[async_trait]
impl<S: LedgerStore> Service<SettlementRequest, SettlementRequestHandler<S>> for SettlementService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{businesses::Business, users::User, wallets::Wallet};
    use crate::repositories::memory::{MemoryStore, MemoryTransaction};
    use futures_util::future::join_all;
    use rstest::rstest;

    fn money(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_business(Business::new("B", Some("acct_B".to_string()))).await;
        store.insert_business(Business::new("C", Some("acct_C".to_string()))).await;
        store.insert_user(User::new("R", None)).await;
        store.insert_user(User::new("U", Some("R".to_string()))).await;
        store.insert_user(User::new("V", None)).await;
        store
    }

    fn engine(store: &MemoryStore) -> SettlementEngine<MemoryStore> {
        SettlementEngine::new(store.clone(), RewardPolicy::default())
    }

    fn settled(result: SettlementResult) -> Settlement {
        match result {
            SettlementResult::Settled(settlement) => settlement,
            other => panic!("expected a settlement, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn settles_referred_purchase() {
        let store = seeded_store().await;

        let settlement = settled(
            engine(&store)
                .settle("pi_1", money("100.00"), "B", "U")
                .await
                .unwrap(),
        );

        let transaction = &settlement.transaction;
        assert_eq!(transaction.payment_id, "pi_1");
        assert_eq!(transaction.amount, money("100.00"));
        assert_eq!(transaction.cashback_earned, money("5.00"));
        assert_eq!(transaction.referrer_id.as_deref(), Some("R"));
        assert_eq!(transaction.referral_reward, Some(money("1.00")));
        assert_eq!(transaction.status, TransactionStatus::Completed);
        assert_eq!(settlement.platform_fee, money("10.00"));

        let user_wallet = store.wallet("U", "B").await.unwrap();
        assert_eq!(user_wallet.balance, money("5.00"));
        assert_eq!(user_wallet.balance_from_referrals, Decimal::ZERO);
        assert_eq!(transaction.wallet_id, user_wallet.id);

        let referrer_wallet = store.wallet("R", "B").await.unwrap();
        assert_eq!(referrer_wallet.balance, Decimal::ZERO);
        assert_eq!(referrer_wallet.balance_from_referrals, money("1.00"));
    }

    #[tokio::test]
    async fn redelivery_changes_nothing() {
        let store = seeded_store().await;
        let engine = engine(&store);
        engine.settle("pi_1", money("100.00"), "B", "U").await.unwrap();

        let again = engine.settle("pi_1", money("100.00"), "B", "U").await.unwrap();

        assert!(matches!(
            again,
            SettlementResult::AlreadyProcessed { ref payment_id } if payment_id == "pi_1"
        ));
        assert_eq!(store.transactions().await.len(), 1);
        assert_eq!(store.wallet("U", "B").await.unwrap().balance, money("5.00"));
        assert_eq!(
            store.wallet("R", "B").await.unwrap().balance_from_referrals,
            money("1.00")
        );
    }

    #[tokio::test]
    async fn purchase_without_referrer_touches_only_purchaser() {
        let store = seeded_store().await;

        let settlement = settled(
            engine(&store)
                .settle("pi_2", money("50.00"), "B", "V")
                .await
                .unwrap(),
        );

        assert_eq!(settlement.transaction.cashback_earned, money("2.50"));
        assert_eq!(settlement.transaction.referrer_id, None);
        assert_eq!(settlement.transaction.referral_reward, None);
        assert_eq!(store.wallets().await.len(), 1);
        assert_eq!(store.wallet("V", "B").await.unwrap().balance, money("2.50"));
    }

    #[tokio::test]
    async fn wallets_are_scoped_per_business() {
        let store = seeded_store().await;
        let engine = engine(&store);

        engine.settle("pi_1", money("100.00"), "B", "U").await.unwrap();
        engine.settle("pi_2", money("20.00"), "C", "U").await.unwrap();
        engine.settle("pi_3", money("40.00"), "B", "U").await.unwrap();

        assert_eq!(store.wallet("U", "B").await.unwrap().balance, money("7.00"));
        assert_eq!(store.wallet("U", "C").await.unwrap().balance, money("1.00"));
        assert_eq!(
            store.wallet("R", "B").await.unwrap().balance_from_referrals,
            money("1.40")
        );
        assert_eq!(
            store.wallet("R", "C").await.unwrap().balance_from_referrals,
            money("0.20")
        );
    }

    #[tokio::test]
    async fn wallet_balances_reconcile_with_ledger() {
        let store = seeded_store().await;
        let engine = engine(&store);
        let payments = [
            ("pi_1", "19.99", "B", "U"),
            ("pi_2", "0.30", "B", "U"),
            ("pi_3", "250.00", "C", "V"),
            ("pi_4", "12.34", "B", "R"),
            ("pi_1", "19.99", "B", "U"),
        ];

        for (payment_id, amount, business_id, user_id) in payments {
            engine
                .settle(payment_id, money(amount), business_id, user_id)
                .await
                .unwrap();
        }

        for wallet in store.wallets().await {
            assert_eq!(
                wallet.balance,
                store.ledger_cashback(&wallet.user_id, &wallet.business_id).await,
                "wallet of {} at {} drifted",
                wallet.user_id,
                wallet.business_id
            );
        }
    }

    #[tokio::test]
    async fn repairs_drifted_wallet_balance() {
        let store = seeded_store().await;
        let engine = engine(&store);
        engine.settle("pi_1", money("100.00"), "B", "V").await.unwrap();
        let wallet = store.wallet("V", "B").await.unwrap();
        store
            .put_wallet(Wallet {
                balance: money("999.00"),
                ..wallet
            })
            .await;

        engine.settle("pi_2", money("20.00"), "B", "V").await.unwrap();

        assert_eq!(store.wallet("V", "B").await.unwrap().balance, money("6.00"));
    }

    #[tokio::test]
    async fn concurrent_duplicates_settle_once() {
        let store = seeded_store().await;
        let engine = Arc::new(engine(&store));

        let attempts = (0..16).map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.settle("pi_1", money("100.00"), "B", "U").await })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let settled_count = results
            .iter()
            .filter(|r| matches!(r, SettlementResult::Settled(_)))
            .count();
        assert_eq!(settled_count, 1);
        assert_eq!(store.transactions().await.len(), 1);
        assert_eq!(store.wallet("U", "B").await.unwrap().balance, money("5.00"));
        assert_eq!(
            store.wallet("R", "B").await.unwrap().balance_from_referrals,
            money("1.00")
        );
    }

    #[tokio::test]
    async fn rejects_unknown_user_without_mutation() {
        let store = seeded_store().await;

        let result = engine(&store).settle("pi_1", money("10.00"), "B", "nobody").await;

        assert!(matches!(result, Err(SettlementError::UserNotFound(ref id)) if id == "nobody"));
        assert!(store.transactions().await.is_empty());
        assert!(store.wallets().await.is_empty());
    }

    #[tokio::test]
    async fn rejects_unknown_business() {
        let store = seeded_store().await;

        let result = engine(&store).settle("pi_1", money("10.00"), "Z", "U").await;

        assert!(matches!(result, Err(SettlementError::BusinessNotFound(_))));
        assert!(store.wallets().await.is_empty());
    }

    #[rstest]
    #[case::zero(Decimal::ZERO)]
    #[case::negative(money("-5.00"))]
    #[case::sub_cent(Decimal::new(1, 3))]
    #[case::above_column_range(money("10000000000.00"))]
    #[case::overflowing(Decimal::MAX)]
    #[tokio::test]
    async fn rejects_invalid_amount_without_mutation(#[case] amount: Decimal) {
        let store = seeded_store().await;

        let result = engine(&store).settle("pi_1", amount, "B", "U").await;

        assert!(matches!(result, Err(SettlementError::InvalidAmount(..))));
        assert!(store.transactions().await.is_empty());
        assert!(store.wallets().await.is_empty());
    }

    #[tokio::test]
    async fn accepts_trailing_zero_fractions() {
        let store = seeded_store().await;

        let settlement = settled(
            engine(&store)
                .settle("pi_1", money("20.000"), "B", "V")
                .await
                .unwrap(),
        );

        assert_eq!(settlement.transaction.cashback_earned, money("1.00"));
    }

    fn unsettled(payment_id: &str, status: TransactionStatus) -> Transaction {
        NewTransaction {
            payment_id: payment_id.to_string(),
            user_id: "U".to_string(),
            business_id: "B".to_string(),
            wallet_id: String::new(),
            amount: money("100.00"),
            cashback_earned: money("5.00"),
            referrer_id: None,
            referral_reward: None,
            status,
        }
        .into_transaction("t_unsettled".to_string())
    }

    #[rstest]
    #[case::pending(TransactionStatus::Pending)]
    #[case::failed(TransactionStatus::Failed)]
    #[tokio::test]
    async fn completes_unsettled_row_with_wallet_credits(#[case] status: TransactionStatus) {
        let store = seeded_store().await;
        store.put_transaction(unsettled("pi_1", status)).await.unwrap();

        let settlement = settled(
            engine(&store)
                .settle("pi_1", money("100.00"), "B", "U")
                .await
                .unwrap(),
        );

        assert_eq!(settlement.transaction.id, "t_unsettled");
        assert_eq!(settlement.transaction.status, TransactionStatus::Completed);
        assert_eq!(settlement.transaction.referrer_id.as_deref(), Some("R"));

        let transactions = store.transactions().await;
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].status, TransactionStatus::Completed);
        assert_eq!(transactions[0].wallet_id, store.wallet("U", "B").await.unwrap().id);
        assert_eq!(store.wallet("U", "B").await.unwrap().balance, money("5.00"));
        assert_eq!(
            store.wallet("R", "B").await.unwrap().balance_from_referrals,
            money("1.00")
        );
    }

    #[tokio::test]
    async fn completed_row_is_settled_only_once() {
        let store = seeded_store().await;
        store
            .put_transaction(unsettled("pi_1", TransactionStatus::Pending))
            .await
            .unwrap();
        let engine = engine(&store);

        engine.settle("pi_1", money("100.00"), "B", "U").await.unwrap();
        let again = engine.settle("pi_1", money("100.00"), "B", "U").await.unwrap();

        assert!(matches!(again, SettlementResult::AlreadyProcessed { .. }));
        assert_eq!(store.wallet("U", "B").await.unwrap().balance, money("5.00"));
        assert_eq!(
            store.wallet("R", "B").await.unwrap().balance_from_referrals,
            money("1.00")
        );
    }

    /// Store whose dedup lookup always misses, standing in for two deliveries
    /// that both passed the lookup before either inserted.
    #[derive(Clone)]
    struct RacingStore(MemoryStore);

    struct RacingTransaction(MemoryTransaction);

    #[async_trait]
    impl LedgerStore for RacingStore {
        type Tx = RacingTransaction;

        async fn begin(&self) -> Result<Self::Tx, RepositoryError> {
            Ok(RacingTransaction(self.0.begin().await?))
        }

        async fn mark_transaction_failed(&self, payment_id: &str) -> Result<bool, RepositoryError> {
            self.0.mark_transaction_failed(payment_id).await
        }

        async fn update_business_onboarding(
            &self,
            update: &AccountUpdate,
        ) -> Result<bool, RepositoryError> {
            self.0.update_business_onboarding(update).await
        }
    }

    #[async_trait]
    impl LedgerTransaction for RacingTransaction {
        async fn lock_wallets(&mut self, keys: &[WalletKey]) -> Result<(), RepositoryError> {
            self.0.lock_wallets(keys).await
        }

        async fn find_user(
            &mut self,
            user_id: &str,
        ) -> Result<Option<crate::models::users::User>, RepositoryError> {
            self.0.find_user(user_id).await
        }

        async fn business_exists(&mut self, business_id: &str) -> Result<bool, RepositoryError> {
            self.0.business_exists(business_id).await
        }

        async fn find_transaction(
            &mut self,
            _payment_id: &str,
        ) -> Result<Option<Transaction>, RepositoryError> {
            Ok(None)
        }

        async fn sum_cashback_earned(&mut self, key: &WalletKey) -> Result<Decimal, RepositoryError> {
            self.0.sum_cashback_earned(key).await
        }

        async fn get_wallet(&mut self, key: &WalletKey) -> Result<Option<Wallet>, RepositoryError> {
            self.0.get_wallet(key).await
        }

        async fn upsert_wallet(
            &mut self,
            key: &WalletKey,
            update: WalletUpdate,
        ) -> Result<Wallet, RepositoryError> {
            self.0.upsert_wallet(key, update).await
        }

        async fn insert_transaction(
            &mut self,
            transaction: NewTransaction,
        ) -> Result<Transaction, RepositoryError> {
            self.0.insert_transaction(transaction).await
        }

        async fn complete_transaction(
            &mut self,
            transaction: NewTransaction,
        ) -> Result<Option<Transaction>, RepositoryError> {
            self.0.complete_transaction(transaction).await
        }

        async fn commit(self) -> Result<(), RepositoryError> {
            self.0.commit().await
        }
    }

    #[tokio::test]
    async fn unique_violation_is_reported_as_already_processed() {
        let store = seeded_store().await;
        let engine = SettlementEngine::new(RacingStore(store.clone()), RewardPolicy::default());

        settled(engine.settle("pi_1", money("100.00"), "B", "U").await.unwrap());
        let second = engine.settle("pi_1", money("100.00"), "B", "U").await.unwrap();

        assert!(matches!(second, SettlementResult::AlreadyProcessed { .. }));
        assert_eq!(store.transactions().await.len(), 1);
        assert_eq!(store.wallet("U", "B").await.unwrap().balance, money("5.00"));
        assert_eq!(
            store.wallet("R", "B").await.unwrap().balance_from_referrals,
            money("1.00")
        );
    }

    #[tokio::test]
    async fn failed_payment_only_moves_pending_rows() {
        let store = seeded_store().await;
        let engine = engine(&store);
        engine.settle("pi_1", money("100.00"), "B", "U").await.unwrap();

        assert!(!engine.fail_payment("pi_1").await.unwrap());
        assert!(!engine.fail_payment("pi_unknown").await.unwrap());
        assert_eq!(
            store.transactions().await[0].status,
            TransactionStatus::Completed
        );
    }
}

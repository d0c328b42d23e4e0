use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use super::RepositoryError;
use crate::models::{
    transactions::{NewTransaction, Transaction, TransactionStatus},
    wallets::WalletKey,
};

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: String,
    payment_id: String,
    user_id: String,
    business_id: String,
    wallet_id: String,
    amount: Decimal,
    cashback_earned: Decimal,
    referrer_id: Option<String>,
    referral_reward: Option<Decimal>,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = RepositoryError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TransactionStatus>()
            .map_err(|e| RepositoryError::Corrupt(format!("transaction {}: {}", row.id, e)))?;

        Ok(Transaction {
            id: row.id,
            payment_id: row.payment_id,
            user_id: row.user_id,
            business_id: row.business_id,
            wallet_id: row.wallet_id,
            amount: row.amount,
            cashback_earned: row.cashback_earned,
            referrer_id: row.referrer_id,
            referral_reward: row.referral_reward,
            status,
            created_at: row.created_at,
        })
    }
}

pub async fn find_by_payment_id(
    conn: &mut PgConnection,
    payment_id: &str,
) -> Result<Option<Transaction>, RepositoryError> {
    let row = sqlx::query_as::<_, TransactionRow>(
        r#"SELECT id, payment_id, user_id, business_id, wallet_id, amount, cashback_earned,
                  referrer_id, referral_reward, status, created_at
        FROM transactions WHERE payment_id = $1"#,
    )
    .bind(payment_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Transaction::try_from).transpose()
}

/// The unique index on `payment_id` turns a concurrent second insert into
/// [`RepositoryError::Duplicate`].
pub async fn insert(
    conn: &mut PgConnection,
    transaction: NewTransaction,
) -> Result<Transaction, RepositoryError> {
    let transaction_id = Uuid::new_v4().hyphenated().to_string();

    let row = sqlx::query_as::<_, TransactionRow>(
        r#"INSERT INTO transactions
        (id, payment_id, user_id, business_id, wallet_id, amount, cashback_earned,
         referrer_id, referral_reward, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING id, payment_id, user_id, business_id, wallet_id, amount, cashback_earned,
                  referrer_id, referral_reward, status, created_at
        "#,
    )
    .bind(transaction_id)
    .bind(&transaction.payment_id)
    .bind(&transaction.user_id)
    .bind(&transaction.business_id)
    .bind(&transaction.wallet_id)
    .bind(transaction.amount)
    .bind(transaction.cashback_earned)
    .bind(&transaction.referrer_id)
    .bind(transaction.referral_reward)
    .bind(transaction.status.as_str())
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

/// Rewrites a `pending` or `failed` row in place. The status guard makes a
/// concurrent completer wait on the row lock and then match nothing.
pub async fn complete_unsettled(
    conn: &mut PgConnection,
    transaction: NewTransaction,
) -> Result<Option<Transaction>, RepositoryError> {
    let row = sqlx::query_as::<_, TransactionRow>(
        r#"UPDATE transactions SET
            user_id = $2,
            business_id = $3,
            wallet_id = $4,
            amount = $5,
            cashback_earned = $6,
            referrer_id = $7,
            referral_reward = $8,
            status = $9,
            updated_at = CURRENT_TIMESTAMP
        WHERE payment_id = $1 AND status <> 'completed'
        RETURNING id, payment_id, user_id, business_id, wallet_id, amount, cashback_earned,
                  referrer_id, referral_reward, status, created_at
        "#,
    )
    .bind(&transaction.payment_id)
    .bind(&transaction.user_id)
    .bind(&transaction.business_id)
    .bind(&transaction.wallet_id)
    .bind(transaction.amount)
    .bind(transaction.cashback_earned)
    .bind(&transaction.referrer_id)
    .bind(transaction.referral_reward)
    .bind(transaction.status.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Transaction::try_from).transpose()
}

pub async fn sum_cashback_earned(
    conn: &mut PgConnection,
    key: &WalletKey,
) -> Result<Decimal, RepositoryError> {
    let total: Decimal = sqlx::query_scalar(
        r#"SELECT COALESCE(SUM(cashback_earned), 0)
        FROM transactions
        WHERE user_id = $1 AND business_id = $2 AND status = 'completed'"#,
    )
    .bind(&key.user_id)
    .bind(&key.business_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(total)
}

pub async fn mark_failed(conn: &mut PgConnection, payment_id: &str) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r#"UPDATE transactions
        SET status = 'failed', updated_at = CURRENT_TIMESTAMP
        WHERE payment_id = $1 AND status = 'pending'"#,
    )
    .bind(payment_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

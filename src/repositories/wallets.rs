use sqlx::PgConnection;
use uuid::Uuid;

use super::RepositoryError;
use crate::models::wallets::{BalanceChange, Wallet, WalletKey, WalletUpdate};

/// Takes a transaction-scoped advisory lock on the wallet key. The wallet row
/// may not exist yet, so a row lock is not enough.
pub async fn lock(conn: &mut PgConnection, key: &WalletKey) -> Result<(), RepositoryError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("wallet:{}:{}", key.user_id, key.business_id))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn find(conn: &mut PgConnection, key: &WalletKey) -> Result<Option<Wallet>, RepositoryError> {
    let wallet = sqlx::query_as::<_, Wallet>(
        r#"SELECT id, user_id, business_id, balance, balance_from_referrals
        FROM wallets WHERE user_id = $1 AND business_id = $2"#,
    )
    .bind(&key.user_id)
    .bind(&key.business_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(wallet)
}

pub async fn upsert(
    conn: &mut PgConnection,
    key: &WalletKey,
    update: WalletUpdate,
) -> Result<Wallet, RepositoryError> {
    let wallet_id = Uuid::new_v4().hyphenated().to_string();
    let (absolute, balance) = match update.balance {
        BalanceChange::Increment(delta) => (false, delta),
        BalanceChange::Set(value) => (true, value),
    };

    let wallet = sqlx::query_as::<_, Wallet>(
        r#"INSERT INTO wallets (id, user_id, business_id, balance, balance_from_referrals)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id, business_id) DO UPDATE SET
            balance = CASE WHEN $6 THEN EXCLUDED.balance
                           ELSE wallets.balance + EXCLUDED.balance END,
            balance_from_referrals = wallets.balance_from_referrals + EXCLUDED.balance_from_referrals,
            updated_at = CURRENT_TIMESTAMP
        RETURNING id, user_id, business_id, balance, balance_from_referrals"#,
    )
    .bind(wallet_id)
    .bind(&key.user_id)
    .bind(&key.business_id)
    .bind(balance)
    .bind(update.referral_delta)
    .bind(absolute)
    .fetch_one(&mut *conn)
    .await?;

    Ok(wallet)
}

use sqlx::PgConnection;

use super::RepositoryError;
use crate::models::businesses::AccountUpdate;

pub async fn exists(conn: &mut PgConnection, business_id: &str) -> Result<bool, RepositoryError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM businesses WHERE id = $1)")
        .bind(business_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(exists)
}

pub async fn update_onboarding(
    conn: &mut PgConnection,
    update: &AccountUpdate,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r#"UPDATE businesses
        SET details_submitted = true,
            charges_enabled = $1,
            payouts_enabled = $2,
            updated_at = CURRENT_TIMESTAMP
        WHERE stripe_account_id = $3"#,
    )
    .bind(update.charges_enabled)
    .bind(update.payouts_enabled)
    .bind(&update.stripe_account_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

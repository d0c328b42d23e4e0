use sqlx::PgConnection;

use super::RepositoryError;
use crate::models::users;

/// Users are created by the signup flow; the ledger only reads them.
pub async fn find_by_id(
    conn: &mut PgConnection,
    user_id: &str,
) -> Result<Option<users::User>, RepositoryError> {
    let user = sqlx::query_as::<_, users::User>(
        "SELECT id, referred_by, created_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(user)
}

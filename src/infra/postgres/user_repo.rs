use {
    crate::domain::error::PipelineError,
    crate::domain::user::{NewUser, User},
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

#[derive(sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub external_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            external_user_id: row.external_user_id,
            created_at: row.created_at,
        }
    }
}

pub async fn find_by_email(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
) -> Result<Option<User>, PipelineError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, email, external_user_id, created_at FROM users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(User::from))
}

pub async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user: &NewUser,
) -> Result<Option<User>, PipelineError> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO users (id, email, external_user_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO NOTHING
        RETURNING id, email, external_user_id, created_at
        "#,
    )
    .bind(user.id)
    .bind(user.email.as_str())
    .bind(user.external_user_id.as_deref())
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(User::from))
}

/// `SELECT … FOR UPDATE` on the user row. Serializes subscription decisions
/// per user even when there is no subscription row yet to lock.
pub async fn lock(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<(), PipelineError> {
    let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

    match locked {
        Some(_) => Ok(()),
        None => Err(PipelineError::Processing(format!(
            "cannot lock missing user {user_id}"
        ))),
    }
}

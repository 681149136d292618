use {
    crate::domain::error::PipelineError,
    crate::domain::subscription::{NewSubscription, Subscription, SubscriptionStatus},
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

#[derive(sqlx::FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: String,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = PipelineError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            status: SubscriptionStatus::try_from(row.status.as_str())?,
            id: row.id,
            user_id: row.user_id,
            plan_id: row.plan_id,
            start_date: row.start_date,
            end_date: row.end_date,
            auto_renew: row.auto_renew,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Latest-ending active subscription, `FOR UPDATE`.
pub async fn find_active_for_update(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Subscription>, PipelineError> {
    let row = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        SELECT id, user_id, plan_id, status, start_date, end_date, auto_renew,
               created_at, updated_at
        FROM subscriptions
        WHERE user_id = $1 AND status = 'active' AND end_date > $2
        ORDER BY end_date DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(Subscription::try_from).transpose()
}

pub async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    subscription: &NewSubscription,
) -> Result<Subscription, PipelineError> {
    let row = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        INSERT INTO subscriptions (id, user_id, plan_id, status, start_date, end_date, auto_renew)
        VALUES ($1, $2, $3, 'active', $4, $5, $6)
        RETURNING id, user_id, plan_id, status, start_date, end_date, auto_renew,
                  created_at, updated_at
        "#,
    )
    .bind(subscription.id)
    .bind(subscription.user_id)
    .bind(&subscription.plan_id)
    .bind(subscription.start_date)
    .bind(subscription.end_date)
    .bind(subscription.auto_renew)
    .fetch_one(&mut **tx)
    .await?;

    Subscription::try_from(row)
}

pub async fn extend(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    new_end_date: DateTime<Utc>,
) -> Result<Subscription, PipelineError> {
    let row = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        UPDATE subscriptions
        SET end_date = $2, updated_at = now()
        WHERE id = $1
        RETURNING id, user_id, plan_id, status, start_date, end_date, auto_renew,
                  created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(new_end_date)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| PipelineError::Processing(format!("subscription {id} not found")))?;

    Subscription::try_from(row)
}

pub async fn expire_lapsed(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<u64, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET status = 'expired', updated_at = now()
        WHERE status = 'active'
          AND end_date <= $1
          AND ($2::uuid IS NULL OR user_id = $2)
        "#,
    )
    .bind(now)
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

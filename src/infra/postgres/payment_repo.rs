use {
    crate::domain::error::PipelineError,
    crate::domain::money::{Currency, Money, MoneyAmount},
    crate::domain::payment::{NewPayment, Payment, PaymentStatus},
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

#[derive(sqlx::FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub external_payment_id: String,
    pub user_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub payment_date: DateTime<Utc>,
    pub subscription_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = PipelineError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let money = Money::new(
            MoneyAmount::new(row.amount)?,
            Currency::parse(&row.currency)?,
        );
        Ok(Payment {
            id: row.id,
            external_payment_id: row.external_payment_id,
            user_id: row.user_id,
            money,
            status: PaymentStatus::try_from(row.status.as_str())?,
            payment_date: row.payment_date,
            subscription_id: row.subscription_id,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn find_by_external_id(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    external_payment_id: &str,
) -> Result<Option<Payment>, PipelineError> {
    let row = sqlx::query_as::<_, PaymentRow>(
        r#"
        SELECT id, external_payment_id, user_id, amount, currency, status,
               payment_date, subscription_id, metadata, created_at, updated_at
        FROM payments
        WHERE external_payment_id = $1
        "#,
    )
    .bind(external_payment_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(Payment::try_from).transpose()
}

/// Insert a payment. Returns `None` when another transaction already owns
/// this external_payment_id; the unique index makes us wait for it first.
pub async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payment: &NewPayment,
) -> Result<Option<Payment>, PipelineError> {
    let row = sqlx::query_as::<_, PaymentRow>(
        r#"
        INSERT INTO payments
            (id, external_payment_id, user_id, amount, currency, status, payment_date, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (external_payment_id) DO NOTHING
        RETURNING id, external_payment_id, user_id, amount, currency, status,
                  payment_date, subscription_id, metadata, created_at, updated_at
        "#,
    )
    .bind(payment.id())
    .bind(payment.external_payment_id().as_str())
    .bind(payment.user_id())
    .bind(payment.money().amount().cents())
    .bind(payment.money().currency().as_str())
    .bind(payment.status().as_str())
    .bind(payment.payment_date())
    .bind(payment.metadata())
    .fetch_optional(&mut **tx)
    .await?;

    row.map(Payment::try_from).transpose()
}

pub async fn link_subscription(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payment_id: Uuid,
    subscription_id: Uuid,
) -> Result<Payment, PipelineError> {
    let row = sqlx::query_as::<_, PaymentRow>(
        r#"
        UPDATE payments
        SET subscription_id = $2, updated_at = now()
        WHERE id = $1
        RETURNING id, external_payment_id, user_id, amount, currency, status,
                  payment_date, subscription_id, metadata, created_at, updated_at
        "#,
    )
    .bind(payment_id)
    .bind(subscription_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| PipelineError::Processing(format!("payment {payment_id} not found")))?;

    Payment::try_from(row)
}

use {
    crate::domain::error::PipelineError,
    crate::domain::id::Email,
    crate::domain::payment::{NewPayment, Payment},
    crate::domain::store::{PaymentLedger, UserRepository},
    crate::domain::user::{NewUser, User},
};

/// Find the user by email or create it. A concurrent creator wins the unique
/// index; we then read back its row.
pub async fn resolve_user<T: UserRepository>(
    tx: &mut T,
    email: &Email,
    external_user_id: Option<&str>,
) -> Result<User, PipelineError> {
    if let Some(user) = tx.find_user_by_email(email).await? {
        return Ok(user);
    }

    let new_user = NewUser::new(email.clone(), external_user_id.map(str::to_string));
    if let Some(user) = tx.insert_user(&new_user).await? {
        tracing::info!(user_id = %user.id, "user created");
        return Ok(user);
    }

    tx.find_user_by_email(email)
        .await?
        .ok_or_else(|| PipelineError::Processing(format!("user {email} conflicted but is missing")))
}

/// Idempotent payment creation. `created` is false when the external id is
/// already in the ledger, in which case the stored row is returned untouched.
pub async fn resolve_payment<T: PaymentLedger>(
    tx: &mut T,
    payment: &NewPayment,
) -> Result<(Payment, bool), PipelineError> {
    if let Some(existing) = tx.find_payment(payment.external_payment_id()).await? {
        tracing::info!(
            payment_id = %existing.id,
            external_payment_id = %payment.external_payment_id(),
            "payment already exists, idempotent replay"
        );
        return Ok((existing, false));
    }

    if let Some(created) = tx.insert_payment(payment).await? {
        return Ok((created, true));
    }

    // Lost the insert race to a transaction that has since committed.
    let existing = tx
        .find_payment(payment.external_payment_id())
        .await?
        .ok_or_else(|| {
            PipelineError::Processing(format!(
                "payment {} conflicted but is missing",
                payment.external_payment_id()
            ))
        })?;
    Ok((existing, false))
}

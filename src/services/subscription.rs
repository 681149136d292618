use {
    crate::domain::error::PipelineError,
    crate::domain::payment::Payment,
    crate::domain::store::{PaymentLedger, SubscriptionRepository, UserRepository},
    crate::domain::subscription::{NewSubscription, Subscription, add_billing_period},
    chrono::{DateTime, Utc},
};

/// Extend the user's active subscription by one billing period, or start a
/// new one, and link `payment` to whichever subscription results.
///
/// The user row lock is taken first so that two payments for a user with no
/// subscription cannot both decide to create one.
pub async fn activate_or_renew<T>(
    tx: &mut T,
    payment: &Payment,
    plan_id: &str,
    now: DateTime<Utc>,
) -> Result<(Subscription, Payment), PipelineError>
where
    T: UserRepository + SubscriptionRepository + PaymentLedger,
{
    let user_id = payment.user_id;
    tx.lock_user(user_id).await?;

    let expired = tx.expire_lapsed_subscriptions(Some(user_id), now).await?;
    if expired > 0 {
        tracing::info!(user_id = %user_id, count = expired, "lapsed subscriptions expired");
    }

    let subscription = match tx.find_active_subscription(user_id, now).await? {
        Some(active) => {
            let new_end_date = add_billing_period(active.end_date)?;
            let renewed = tx.extend_subscription(active.id, new_end_date).await?;
            tracing::info!(
                subscription_id = %renewed.id,
                new_end_date = %renewed.end_date,
                "subscription renewed"
            );
            renewed
        }
        None => {
            let new_subscription = NewSubscription::starting_at(user_id, plan_id, now)?;
            let created = tx.insert_subscription(&new_subscription).await?;
            tracing::info!(
                subscription_id = %created.id,
                user_id = %user_id,
                start_date = %created.start_date,
                end_date = %created.end_date,
                "subscription created"
            );
            created
        }
    };

    let payment = tx
        .link_payment_subscription(payment.id, subscription.id)
        .await?;
    Ok((subscription, payment))
}

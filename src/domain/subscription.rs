use {
    super::error::PipelineError,
    chrono::{DateTime, Datelike, Days, Months, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SubscriptionStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(PipelineError::Validation(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date > now
    }
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub auto_renew: bool,
}

impl NewSubscription {
    /// A fresh active subscription covering one billing period from `start`.
    pub fn starting_at(
        user_id: Uuid,
        plan_id: impl Into<String>,
        start: DateTime<Utc>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            id: Uuid::now_v7(),
            user_id,
            plan_id: plan_id.into(),
            start_date: start,
            end_date: add_billing_period(start)?,
            auto_renew: true,
        })
    }
}

/// One calendar month later. The month field is incremented and a day that
/// does not exist in the target month rolls over into the next one, so
/// Jan 31 becomes Mar 3 (Mar 2 in leap years). Time of day is kept.
pub fn add_billing_period(from: DateTime<Utc>) -> Result<DateTime<Utc>, PipelineError> {
    from.with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(|next| next.checked_add_days(Days::new(u64::from(from.day0()))))
        .ok_or_else(|| PipelineError::Processing(format!("billing period overflow from {from}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 30, 0).unwrap()
    }

    #[test]
    fn mid_month_keeps_day() {
        assert_eq!(add_billing_period(at(2024, 3, 15)).unwrap(), at(2024, 4, 15));
    }

    #[test]
    fn december_rolls_year() {
        assert_eq!(add_billing_period(at(2023, 12, 10)).unwrap(), at(2024, 1, 10));
    }

    #[test]
    fn short_month_overflows_forward() {
        assert_eq!(add_billing_period(at(2023, 1, 31)).unwrap(), at(2023, 3, 3));
        assert_eq!(add_billing_period(at(2024, 1, 31)).unwrap(), at(2024, 3, 2));
        assert_eq!(add_billing_period(at(2024, 3, 31)).unwrap(), at(2024, 5, 1));
    }

    #[test]
    fn new_subscription_spans_one_period() {
        let start = at(2024, 2, 29);
        let sub = NewSubscription::starting_at(Uuid::now_v7(), "default", start).unwrap();
        assert_eq!(sub.start_date, start);
        assert_eq!(sub.end_date, at(2024, 3, 29));
        assert!(sub.auto_renew);
    }
}

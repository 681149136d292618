use {
    super::id::Email,
    chrono::{DateTime, Utc},
    serde::Serialize,
    uuid::Uuid,
};

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub external_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub email: Email,
    pub external_user_id: Option<String>,
}

impl NewUser {
    pub fn new(email: Email, external_user_id: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            email,
            external_user_id,
        }
    }
}

use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::error::PipelineError;

const MAX_ID_LEN: usize = 255;

fn check_external_id(label: &str, id: &str) -> Result<(), PipelineError> {
    if id.trim().is_empty() {
        return Err(PipelineError::Validation(format!("{label} must not be empty")));
    }
    if id.len() > MAX_ID_LEN {
        return Err(PipelineError::Validation(format!(
            "{label} longer than {MAX_ID_LEN} bytes"
        )));
    }
    Ok(())
}

/// Provider-assigned notification identifier; the deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalEventId(String);

impl ExternalEventId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        check_external_id("external event id", &id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Provider-assigned payment identifier; at most one payment row per value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalPaymentId(String);

impl ExternalPaymentId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        check_external_id("external payment id", &id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Normalized (trimmed, lowercase) email, the natural key for users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let email = raw.trim().to_lowercase();
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@')
                    && !email.chars().any(char::is_whitespace)
            }
            None => false,
        };
        if !valid || email.len() > MAX_ID_LEN {
            return Err(PipelineError::Validation(format!("invalid email: {raw}")));
        }
        Ok(Self(email))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

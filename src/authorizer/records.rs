//! Optional gate on the local user record.
//!
//! The `users` table keys records by the provider subject in `auth_id` and
//! carries a lifecycle `status`. Only `ACTIVE` users are let through.

use async_trait::async_trait;
use sqlx::PgPool;
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::{info_span, Instrument};

#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("user record lookup failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unknown user status: {0}")]
    UnknownStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

impl UserStatus {
    #[must_use]
    pub const fn is_permitted(self) -> bool {
        matches!(self, Self::Active)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = RecordsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            "SUSPENDED" => Ok(Self::Suspended),
            _ => Err(RecordsError::UnknownStatus(s.to_string())),
        }
    }
}

/// Read-only access to user record status by provider subject.
#[async_trait]
pub trait UserRecords: Send + Sync {
    /// `Ok(None)` when no record exists for `auth_id`.
    async fn status(&self, auth_id: &str) -> Result<Option<UserStatus>, RecordsError>;

    /// Connectivity probe for health reporting.
    async fn ping(&self) -> Result<(), RecordsError>;
}

/// [`UserRecords`] over the PostgreSQL `users` table.
#[derive(Debug, Clone)]
pub struct PgUserRecords {
    pool: PgPool,
}

impl PgUserRecords {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRecords for PgUserRecords {
    async fn status(&self, auth_id: &str) -> Result<Option<UserStatus>, RecordsError> {
        let span = info_span!(
            "db.users.status",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let status: Option<String> =
            sqlx::query_scalar("SELECT status::text FROM users WHERE auth_id = $1 LIMIT 1")
                .bind(auth_id)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await?;

        status.map(|s| s.parse()).transpose()
    }

    async fn ping(&self) -> Result<(), RecordsError> {
        let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

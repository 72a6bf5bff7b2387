use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::{PgDatabaseError, PgPool, PgPoolOptions};
use thiserror::Error;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../migrations");

/// The database's own description of a rejected write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendErrorDetail {
    pub code: Option<String>,
    pub message: String,
    pub details: Option<String>,
    pub hint: Option<String>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// The database received the insert and refused it.
    #[error("database rejected insert: {}", .0.message)]
    Backend(BackendErrorDetail),
    /// The insert never got an answer: pool, network or protocol trouble.
    #[error("database unavailable: {0}")]
    Transport(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                let pg = db.try_downcast_ref::<PgDatabaseError>();
                StoreError::Backend(BackendErrorDetail {
                    code: db.code().map(|c| c.into_owned()),
                    message: db.message().to_string(),
                    details: pg.and_then(|e| e.detail()).map(str::to_string),
                    hint: pg.and_then(|e| e.hint()).map(str::to_string),
                })
            }
            other => StoreError::Transport(other.to_string()),
        }
    }
}

/// Row written to `contacts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRow {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub service: Option<String>,
    pub message: String,
    pub source: Option<String>,
    pub ghl_contact_id: Option<String>,
}

/// Row written to `leads`. `extra` holds type-specific fields, null when none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadRow {
    pub lead_type: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub message: Option<String>,
    pub source: Option<String>,
    pub ghl_contact_id: Option<String>,
    pub extra: Option<Value>,
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn insert_contact(&self, row: &ContactRow) -> Result<(), StoreError>;
    async fn insert_lead(&self, row: &LeadRow) -> Result<(), StoreError>;
}

pub struct PgLeadStore {
    pool: PgPool,
}

/// Connections are opened on first use, so an unreachable database surfaces
/// as insert failures rather than a startup failure.
pub fn get_pool(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300))
        .connect_lazy(url)
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(&self.pool).await
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn insert_contact(&self, row: &ContactRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO contacts
                (name, email, phone, organization, service, message, source, ghl_contact_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&row.name)
        .bind(&row.email)
        .bind(&row.phone)
        .bind(&row.organization)
        .bind(&row.service)
        .bind(&row.message)
        .bind(&row.source)
        .bind(&row.ghl_contact_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_lead(&self, row: &LeadRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO leads
                (type, name, email, phone, organization, message, source, ghl_contact_id, extra)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&row.lead_type)
        .bind(&row.name)
        .bind(&row.email)
        .bind(&row.phone)
        .bind(&row.organization)
        .bind(&row.message)
        .bind(&row.source)
        .bind(&row.ghl_contact_id)
        .bind(&row.extra)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

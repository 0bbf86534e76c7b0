use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{conflict_on_unique, insert_audit, parse_column, PgStore};
use crate::domain::{AuditLogEntry, Bank, BankStatus, VpaMapping};
use crate::ports::{BankRepository, RepositoryResult, VpaRepository};

const VPA_COLUMNS: &str =
    "id, vpa, bank_code, account_number, holder_name, mobile, is_active, created_at, updated_at";

const BANK_COLUMNS: &str = r#"
    bank_code, name, endpoint, public_key, status, last_heartbeat,
    success_rate, avg_response_time_ms, created_at, updated_at
"#;

#[async_trait]
impl VpaRepository for PgStore {
    async fn get_active_vpa(&self, vpa: &str) -> RepositoryResult<Option<VpaMapping>> {
        let row = sqlx::query_as::<_, VpaRow>(&format!(
            "SELECT {} FROM vpa_mappings WHERE vpa = $1 AND is_active",
            VPA_COLUMNS
        ))
        .bind(vpa)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(VpaRow::into_domain))
    }

    async fn vpa_mapping_at_bank(&self, vpa: &str, bank_code: &str) -> RepositoryResult<Option<VpaMapping>> {
        let row = sqlx::query_as::<_, VpaRow>(&format!(
            r#"
            SELECT {} FROM vpa_mappings
            WHERE vpa = $1 AND bank_code = $2
            ORDER BY is_active DESC, created_at DESC
            LIMIT 1
            "#,
            VPA_COLUMNS
        ))
        .bind(vpa)
        .bind(bank_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(VpaRow::into_domain))
    }

    async fn register_vpa(
        &self,
        mapping: &VpaMapping,
        audit: &AuditLogEntry,
    ) -> RepositoryResult<Option<VpaMapping>> {
        let mut db_tx = self.pool.begin().await?;

        let replaced = sqlx::query_as::<_, VpaRow>(&format!(
            r#"
            UPDATE vpa_mappings SET is_active = FALSE, updated_at = NOW()
            WHERE vpa = $1 AND is_active
            RETURNING {}
            "#,
            VPA_COLUMNS
        ))
        .bind(&mapping.vpa)
        .fetch_optional(&mut *db_tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO vpa_mappings (
                id, vpa, bank_code, account_number, holder_name, mobile, is_active, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8)
            "#,
        )
        .bind(mapping.id)
        .bind(&mapping.vpa)
        .bind(&mapping.bank_code)
        .bind(&mapping.account_number)
        .bind(&mapping.holder_name)
        .bind(&mapping.mobile)
        .bind(mapping.created_at)
        .bind(mapping.updated_at)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("vpa {} is being registered concurrently", mapping.vpa)))?;

        insert_audit(&mut *db_tx, audit).await?;
        db_tx.commit().await?;

        Ok(replaced.map(VpaRow::into_domain))
    }

    async fn deactivate_vpa(&self, vpa: &str, audit: &AuditLogEntry) -> RepositoryResult<bool> {
        let mut db_tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE vpa_mappings SET is_active = FALSE, updated_at = NOW() WHERE vpa = $1 AND is_active",
        )
        .bind(vpa)
        .execute(&mut *db_tx)
        .await?;

        if result.rows_affected() == 0 {
            db_tx.rollback().await?;
            return Ok(false);
        }

        insert_audit(&mut *db_tx, audit).await?;
        db_tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl BankRepository for PgStore {
    async fn insert_bank(&self, bank: &Bank, audit: &AuditLogEntry) -> RepositoryResult<Bank> {
        let mut db_tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BankRow>(&format!(
            r#"
            INSERT INTO banks (
                bank_code, name, endpoint, public_key, status, last_heartbeat,
                success_rate, avg_response_time_ms, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            BANK_COLUMNS
        ))
        .bind(&bank.bank_code)
        .bind(&bank.name)
        .bind(&bank.endpoint)
        .bind(&bank.public_key)
        .bind(bank.status.as_str())
        .bind(bank.last_heartbeat)
        .bind(bank.success_rate)
        .bind(bank.avg_response_time_ms)
        .bind(bank.created_at)
        .bind(bank.updated_at)
        .fetch_one(&mut *db_tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("bank {} already registered", bank.bank_code)))?;

        insert_audit(&mut *db_tx, audit).await?;
        db_tx.commit().await?;

        row.into_domain()
    }

    async fn get_bank(&self, bank_code: &str) -> RepositoryResult<Option<Bank>> {
        let row = sqlx::query_as::<_, BankRow>(&format!(
            "SELECT {} FROM banks WHERE bank_code = $1",
            BANK_COLUMNS
        ))
        .bind(bank_code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BankRow::into_domain).transpose()
    }

    async fn list_banks(&self, status: Option<BankStatus>) -> RepositoryResult<Vec<Bank>> {
        let rows = sqlx::query_as::<_, BankRow>(&format!(
            "SELECT {} FROM banks WHERE ($1::text IS NULL OR status = $1) ORDER BY bank_code",
            BANK_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BankRow::into_domain).collect()
    }

    async fn update_bank_status(
        &self,
        bank_code: &str,
        status: BankStatus,
        audit: &AuditLogEntry,
    ) -> RepositoryResult<Option<Bank>> {
        let mut db_tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BankRow>(&format!(
            "UPDATE banks SET status = $2, updated_at = NOW() WHERE bank_code = $1 RETURNING {}",
            BANK_COLUMNS
        ))
        .bind(bank_code)
        .bind(status.as_str())
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            db_tx.rollback().await?;
            return Ok(None);
        };

        insert_audit(&mut *db_tx, audit).await?;
        db_tx.commit().await?;
        row.into_domain().map(Some)
    }

    async fn update_bank_health(
        &self,
        bank_code: &str,
        last_heartbeat: DateTime<Utc>,
        success_rate: f64,
        avg_response_time_ms: f64,
    ) -> RepositoryResult<Option<Bank>> {
        let row = sqlx::query_as::<_, BankRow>(&format!(
            r#"
            UPDATE banks SET
                last_heartbeat = $2, success_rate = $3, avg_response_time_ms = $4, updated_at = $2
            WHERE bank_code = $1
            RETURNING {}
            "#,
            BANK_COLUMNS
        ))
        .bind(bank_code)
        .bind(last_heartbeat)
        .bind(success_rate)
        .bind(avg_response_time_ms)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BankRow::into_domain).transpose()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VpaRow {
    id: Uuid,
    vpa: String,
    bank_code: String,
    account_number: String,
    holder_name: String,
    mobile: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl VpaRow {
    fn into_domain(self) -> VpaMapping {
        VpaMapping {
            id: self.id,
            vpa: self.vpa,
            bank_code: self.bank_code,
            account_number: self.account_number,
            holder_name: self.holder_name,
            mobile: self.mobile,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BankRow {
    bank_code: String,
    name: String,
    endpoint: String,
    public_key: Option<String>,
    status: String,
    last_heartbeat: Option<DateTime<Utc>>,
    success_rate: f64,
    avg_response_time_ms: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BankRow {
    fn into_domain(self) -> RepositoryResult<Bank> {
        Ok(Bank {
            status: parse_column("status", &self.status)?,
            bank_code: self.bank_code,
            name: self.name,
            endpoint: self.endpoint,
            public_key: self.public_key,
            last_heartbeat: self.last_heartbeat,
            success_rate: self.success_rate,
            avg_response_time_ms: self.avg_response_time_ms,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

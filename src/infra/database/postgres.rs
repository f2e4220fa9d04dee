//! PostgreSQL job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgPoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::domain::{
    AppError, Chain, CodeHashRequest, DatabaseError, InternalData, Job, JobFilters, JobRepository,
    JobStatus, JobType, JobUpdate, Log, Receipt, Transaction, WILDCARD_TENANT,
};

const JOB_COLUMNS: &str = "uuid, schedule_uuid, chain_uuid, tenant_id, job_type, status, \
     transaction_data, internal_data, receipt, next_job_uuid, created_at, updated_at";

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL repository with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, AppError> {
        let job_type: String = row.get("job_type");
        let status: String = row.get("status");
        let transaction: Json<Transaction> = row
            .try_get("transaction_data")
            .map_err(|e| AppError::Deserialization(e.to_string()))?;
        let internal_data: Json<InternalData> = row
            .try_get("internal_data")
            .map_err(|e| AppError::Deserialization(e.to_string()))?;
        let receipt: Option<Json<Receipt>> = row
            .try_get("receipt")
            .map_err(|e| AppError::Deserialization(e.to_string()))?;

        Ok(Job {
            uuid: row.get("uuid"),
            schedule_uuid: row.get("schedule_uuid"),
            chain_uuid: row.get("chain_uuid"),
            tenant_id: row.get("tenant_id"),
            job_type: job_type
                .parse::<JobType>()
                .map_err(|e| AppError::Database(DatabaseError::Query(e)))?,
            status: status
                .parse::<JobStatus>()
                .map_err(|e| AppError::Database(DatabaseError::Query(e)))?,
            transaction: transaction.0,
            internal_data: internal_data.0,
            receipt: receipt.map(|r| r.0),
            next_job_uuid: row.get("next_job_uuid"),
            logs: Vec::new(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Attach logs to the jobs in a single round trip
    async fn load_logs(&self, jobs: &mut [Job]) -> Result<(), AppError> {
        if jobs.is_empty() {
            return Ok(());
        }
        let uuids: Vec<String> = jobs.iter().map(|j| j.uuid.clone()).collect();
        let rows = sqlx::query(
            r#"
            SELECT job_uuid, status, message, created_at
            FROM logs
            WHERE job_uuid = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        let mut by_job: HashMap<String, Vec<Log>> = HashMap::new();
        for row in rows {
            let status: String = row.get("status");
            let created_at: DateTime<Utc> = row.get("created_at");
            by_job
                .entry(row.get("job_uuid"))
                .or_default()
                .push(Log {
                    status: status
                        .parse()
                        .map_err(|e| AppError::Database(DatabaseError::Query(e)))?,
                    message: row.get("message"),
                    created_at,
                });
        }
        for job in jobs.iter_mut() {
            job.logs = by_job.remove(&job.uuid).unwrap_or_default();
        }
        Ok(())
    }
}

fn query_error(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Database(DatabaseError::Duplicate(db.message().to_string()))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            AppError::Database(DatabaseError::Connection(e.to_string()))
        }
        _ => AppError::Database(DatabaseError::Query(e.to_string())),
    }
}

fn is_wildcard(tenants: &[String]) -> bool {
    tenants.iter().any(|t| t == WILDCARD_TENANT)
}

async fn insert_log(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    job_uuid: &str,
    log: &Log,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO logs (job_uuid, status, message, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(job_uuid)
    .bind(log.status.as_str())
    .bind(&log.message)
    .bind(log.created_at)
    .execute(&mut **tx)
    .await
    .map_err(query_error)?;
    Ok(())
}

#[async_trait]
impl JobRepository for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_uuid = %job.uuid, tenant_id = %job.tenant_id))]
    async fn insert_job(&self, job: &Job) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (uuid, schedule_uuid, chain_uuid, tenant_id, job_type, status,
                              tx_hash, parent_job_uuid, next_job_uuid, transaction_data,
                              internal_data, receipt, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&job.uuid)
        .bind(&job.schedule_uuid)
        .bind(&job.chain_uuid)
        .bind(&job.tenant_id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.tx_hash())
        .bind(&job.internal_data.parent_job_uuid)
        .bind(&job.next_job_uuid)
        .bind(Json(&job.transaction))
        .bind(Json(&job.internal_data))
        .bind(job.receipt.as_ref().map(Json))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        for log in &job.logs {
            insert_log(&mut tx, &job.uuid, log).await?;
        }

        tx.commit().await.map_err(query_error)?;
        debug!("Job inserted");
        Ok(())
    }

    #[instrument(skip(self, tenants))]
    async fn find_job(&self, uuid: &str, tenants: &[String]) -> Result<Option<Job>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE uuid = $1 AND ($2 OR tenant_id = ANY($3))",
            JOB_COLUMNS
        ))
        .bind(uuid)
        .bind(is_wildcard(tenants))
        .bind(tenants)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut jobs = vec![Self::row_to_job(&row)?];
        self.load_logs(&mut jobs).await?;
        Ok(jobs.pop())
    }

    #[instrument(skip(self, filters, tenants))]
    async fn search_jobs(
        &self,
        filters: &JobFilters,
        tenants: &[String],
    ) -> Result<Vec<Job>, AppError> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM jobs WHERE (", JOB_COLUMNS));
        query
            .push_bind(is_wildcard(tenants))
            .push(" OR tenant_id = ANY(")
            .push_bind(tenants.to_vec())
            .push("))");

        if !filters.tx_hashes.is_empty() {
            query
                .push(" AND tx_hash = ANY(")
                .push_bind(filters.tx_hashes.clone())
                .push(")");
        }
        if let Some(chain_uuid) = &filters.chain_uuid {
            query.push(" AND chain_uuid = ").push_bind(chain_uuid.clone());
        }
        if let Some(status) = filters.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(parent) = &filters.parent_job_uuid {
            query
                .push(" AND (uuid = ")
                .push_bind(parent.clone())
                .push(" OR parent_job_uuid = ")
                .push_bind(parent.clone())
                .push(")");
        }
        if filters.only_parents {
            query.push(" AND parent_job_uuid IS NULL");
        }
        query.push(" ORDER BY created_at, uuid");

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        let mut jobs = rows
            .iter()
            .map(Self::row_to_job)
            .collect::<Result<Vec<_>, _>>()?;
        self.load_logs(&mut jobs).await?;
        debug!(count = jobs.len(), "Jobs found");
        Ok(jobs)
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn persist_job_updates(&self, updates: &[JobUpdate]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        for update in updates {
            let job = &update.job;
            let result = sqlx::query(
                r#"
                UPDATE jobs
                SET status = $2, tx_hash = $3, next_job_uuid = $4, transaction_data = $5,
                    internal_data = $6, receipt = $7, updated_at = $8
                WHERE uuid = $1
                "#,
            )
            .bind(&job.uuid)
            .bind(job.status.as_str())
            .bind(job.tx_hash())
            .bind(&job.next_job_uuid)
            .bind(Json(&job.transaction))
            .bind(Json(&job.internal_data))
            .bind(job.receipt.as_ref().map(Json))
            .bind(job.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

            // Dropping `tx` rolls the batch back
            if result.rows_affected() == 0 {
                return Err(AppError::Database(DatabaseError::NotFound(job.uuid.clone())));
            }
            if let Some(log) = &update.log {
                insert_log(&mut tx, &job.uuid, log).await?;
            }
        }

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_chain(&self, uuid: &str) -> Result<Option<Chain>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT uuid, name, chain_id, urls, listener_block_time_ms, tenant_id
            FROM chains
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.map(|row| {
            let urls: Json<Vec<String>> = row
                .try_get("urls")
                .map_err(|e| AppError::Deserialization(e.to_string()))?;
            let block_time: i64 = row.get("listener_block_time_ms");
            Ok(Chain {
                uuid: row.get("uuid"),
                name: row.get("name"),
                chain_id: row.get("chain_id"),
                urls: urls.0,
                listener_block_time_ms: u64::try_from(block_time).unwrap_or(0),
                tenant_id: row.get("tenant_id"),
            })
        })
        .transpose()
    }

    #[instrument(skip(self, chain), fields(chain_uuid = %chain.uuid))]
    async fn upsert_chain(&self, chain: &Chain) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO chains (uuid, name, chain_id, urls, listener_block_time_ms, tenant_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (uuid) DO UPDATE
            SET name = EXCLUDED.name,
                chain_id = EXCLUDED.chain_id,
                urls = EXCLUDED.urls,
                listener_block_time_ms = EXCLUDED.listener_block_time_ms,
                tenant_id = EXCLUDED.tenant_id,
                updated_at = NOW()
            "#,
        )
        .bind(&chain.uuid)
        .bind(&chain.name)
        .bind(&chain.chain_id)
        .bind(Json(&chain.urls))
        .bind(i64::try_from(chain.listener_block_time_ms).unwrap_or(i64::MAX))
        .bind(&chain.tenant_id)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(chain_id = %request.chain_id, address = %request.address))]
    async fn upsert_code_hash(&self, request: &CodeHashRequest) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO contract_code_hashes (chain_id, address, code_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (chain_id, address) DO UPDATE
            SET code_hash = EXCLUDED.code_hash, updated_at = NOW()
            "#,
        )
        .bind(&request.chain_id)
        .bind(request.address.to_lowercase())
        .bind(&request.code_hash)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.acquire_timeout, Duration::from_secs(3));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
    }

    #[test]
    fn test_wildcard_tenant_detection() {
        assert!(is_wildcard(&["tenant-a".to_string(), "*".to_string()]));
        assert!(!is_wildcard(&["tenant-a".to_string()]));
        assert!(!is_wildcard(&[]));
    }

    #[test]
    fn test_pool_errors_are_connection_errors() {
        let err = query_error(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
        let err = query_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::Database(DatabaseError::Query(_))));
    }
}

//! Postgres-backed datastore.
//!
//! Documents and subjects are persisted as JSONB payloads next to the columns
//! the store filters on; the ledger table is append-only with a BIGSERIAL
//! insertion sequence. Subject reads take `FOR UPDATE` row locks, so two
//! concurrent scopes cannot both deduct from the same stale value.
//!
//! ## Error mapping
//!
//! | PostgreSQL error code | EngineError | Scenario |
//! |-----------------------|-------------|----------|
//! | `23505` | `Conflict` | Duplicate document or duplicate ledger entry |
//! | `40001`, `40P01` | `TransactionAborted` | Serialization failure / deadlock, retried by the engine |
//! | anything else | `Internal` | Logged at error level, details never reach callers |
//!
//! ## Runtime bridging
//!
//! [`Datastore`] is synchronous while sqlx is async, so every call runs
//! through `tokio::runtime::Handle::block_on`. Call `transact` from a
//! blocking context (e.g. `spawn_blocking`) when a multi-threaded runtime is
//! active; blocking a runtime worker thread panics by tokio's own rules.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use uuid::Uuid;

use opsledger_core::{EngineError, EngineResult, SubjectId, TenantId};
use opsledger_engine::{Datastore, StoreTx};
use opsledger_finance::{FinancialTransaction, TransactionId, Transfer, TransferId};
use opsledger_ledger::{
    EntryAmount, EntryFilter, EntryPage, LedgerEntry, NewEntry, Subject,
};
use opsledger_orders::{Order, OrderId};

const SCHEMA: &str = include_str!("schema.sql");

/// Postgres implementation of [`Datastore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the tables and indexes the store needs, idempotently.
    pub async fn ensure_schema(&self) -> EngineResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Datastore for PgStore {
    fn transact<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut dyn StoreTx) -> EngineResult<T>,
    {
        let handle = Handle::try_current().map_err(|_| {
            tracing::error!("PgStore requires an ambient tokio runtime");
            EngineError::Internal
        })?;

        let tx = handle
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin", e))?;

        let mut scope = PgTx {
            tx,
            handle: handle.clone(),
        };
        let result = f(&mut scope);
        let PgTx { tx, handle } = scope;

        match result {
            Ok(value) => {
                handle
                    .block_on(tx.commit())
                    .map_err(|e| map_sqlx_error("commit", e))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = handle.block_on(tx.rollback()) {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// One database transaction bridged to the synchronous [`StoreTx`] surface.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    handle: Handle,
}

impl PgTx {
    fn insert_document(
        &mut self,
        table: &str,
        tenant_id: TenantId,
        id: Uuid,
        payload: &serde_json::Value,
    ) -> EngineResult<()> {
        let sql = format!("INSERT INTO {table} (tenant_id, id, payload) VALUES ($1, $2, $3)");
        self.handle
            .block_on(
                sqlx::query(&sql)
                    .bind(tenant_id.as_uuid())
                    .bind(id)
                    .bind(payload)
                    .execute(&mut *self.tx),
            )
            .map_err(|e| map_sqlx_error("insert_document", e))?;
        Ok(())
    }

    fn load_document<T: DeserializeOwned>(
        &mut self,
        table: &str,
        tenant_id: TenantId,
        id: Uuid,
    ) -> EngineResult<Option<T>> {
        let sql =
            format!("SELECT payload FROM {table} WHERE tenant_id = $1 AND id = $2 FOR UPDATE");
        let row = self
            .handle
            .block_on(
                sqlx::query(&sql)
                    .bind(tenant_id.as_uuid())
                    .bind(id)
                    .fetch_optional(&mut *self.tx),
            )
            .map_err(|e| map_sqlx_error("load_document", e))?;
        row.map(|row| from_payload(payload_column(&row)?)).transpose()
    }

    fn update_document(
        &mut self,
        table: &str,
        tenant_id: TenantId,
        id: Uuid,
        payload: &serde_json::Value,
    ) -> EngineResult<()> {
        let sql = format!("UPDATE {table} SET payload = $3 WHERE tenant_id = $1 AND id = $2");
        let result = self
            .handle
            .block_on(
                sqlx::query(&sql)
                    .bind(tenant_id.as_uuid())
                    .bind(id)
                    .bind(payload)
                    .execute(&mut *self.tx),
            )
            .map_err(|e| map_sqlx_error("update_document", e))?;
        if result.rows_affected() == 0 {
            return Err(EngineError::not_found(format!("document {id}")));
        }
        Ok(())
    }
}

impl StoreTx for PgTx {
    fn subject(&mut self, tenant_id: TenantId, id: SubjectId) -> EngineResult<Option<Subject>> {
        let row = self
            .handle
            .block_on(
                sqlx::query(
                    "SELECT payload FROM subjects WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
                )
                .bind(tenant_id.as_uuid())
                .bind(id.as_uuid())
                .fetch_optional(&mut *self.tx),
            )
            .map_err(|e| map_sqlx_error("load_subject", e))?;
        row.map(|row| from_payload(payload_column(&row)?)).transpose()
    }

    fn put_subject(&mut self, subject: &Subject) -> EngineResult<()> {
        let payload = to_payload(subject)?;
        self.handle
            .block_on(
                sqlx::query(
                    r#"
                    INSERT INTO subjects (tenant_id, id, name, payload)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (tenant_id, id)
                    DO UPDATE SET name = EXCLUDED.name, payload = EXCLUDED.payload
                    "#,
                )
                .bind(subject.tenant_id.as_uuid())
                .bind(subject.id.as_uuid())
                .bind(&subject.name)
                .bind(&payload)
                .execute(&mut *self.tx),
            )
            .map_err(|e| map_sqlx_error("put_subject", e))?;
        Ok(())
    }

    fn append_entry(&mut self, entry: NewEntry) -> EngineResult<LedgerEntry> {
        let payload = to_payload(&entry)?;
        let row = self
            .handle
            .block_on(
                sqlx::query(
                    r#"
                    INSERT INTO ledger_entries
                        (tenant_id, subject_id, kind, document_id, recorded_at, payload)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING seq
                    "#,
                )
                .bind(entry.tenant_id.as_uuid())
                .bind(entry.subject_id.as_uuid())
                .bind(entry.kind.to_string())
                .bind(entry.document_id.map(|d| *d.as_uuid()))
                .bind(entry.recorded_at)
                .bind(&payload)
                .fetch_one(&mut *self.tx),
            )
            .map_err(|e| match map_sqlx_error("append_entry", e) {
                EngineError::Conflict(_) => EngineError::conflict(format!(
                    "ledger entry for document {:?}, subject {}, kind {} already exists",
                    entry.document_id, entry.subject_id, entry.kind
                )),
                other => other,
            })?;

        let seq: i64 = row.try_get("seq").map_err(row_decode_error)?;
        Ok(entry.into_stored(seq as u64))
    }

    fn sum_for(
        &mut self,
        tenant_id: TenantId,
        subject_id: SubjectId,
        as_of: Option<DateTime<Utc>>,
    ) -> EngineResult<Option<EntryAmount>> {
        let rows = self
            .handle
            .block_on(
                sqlx::query(
                    r#"
                    SELECT payload FROM ledger_entries
                    WHERE tenant_id = $1 AND subject_id = $2
                        AND ($3::timestamptz IS NULL OR recorded_at <= $3)
                    ORDER BY seq ASC
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(subject_id.as_uuid())
                .bind(as_of)
                .fetch_all(&mut *self.tx),
            )
            .map_err(|e| map_sqlx_error("sum_entries", e))?;

        let mut sum: Option<EntryAmount> = None;
        for row in rows {
            let entry: NewEntry = from_payload(payload_column(&row)?)?;
            sum = Some(match sum {
                Some(acc) => acc.checked_add(&entry.amount)?,
                None => entry.amount,
            });
        }
        Ok(sum)
    }

    fn entries_for(
        &mut self,
        tenant_id: TenantId,
        subject_id: SubjectId,
        filter: &EntryFilter,
        cursor: Option<u64>,
        limit: usize,
    ) -> EngineResult<EntryPage> {
        let rows = self
            .handle
            .block_on(
                sqlx::query(
                    r#"
                    SELECT seq, payload FROM ledger_entries
                    WHERE tenant_id = $1 AND subject_id = $2 AND seq > $3
                        AND ($4::text IS NULL OR kind = $4)
                        AND ($5::uuid IS NULL OR document_id = $5)
                        AND ($6::timestamptz IS NULL OR recorded_at >= $6)
                        AND ($7::timestamptz IS NULL OR recorded_at <= $7)
                    ORDER BY seq ASC
                    LIMIT $8
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(subject_id.as_uuid())
                .bind(cursor.unwrap_or(0) as i64)
                .bind(filter.kind.map(|k| k.to_string()))
                .bind(filter.document_id.map(|d| *d.as_uuid()))
                .bind(filter.recorded_after)
                .bind(filter.recorded_before)
                .bind(limit as i64 + 1)
                .fetch_all(&mut *self.tx),
            )
            .map_err(|e| map_sqlx_error("list_entries", e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let seq: i64 = row.try_get("seq").map_err(row_decode_error)?;
            let entry: NewEntry = from_payload(payload_column(&row)?)?;
            entries.push(entry.into_stored(seq as u64));
        }

        let next = if entries.len() > limit {
            entries.truncate(limit);
            entries.last().map(|e| e.seq)
        } else {
            None
        };
        Ok(EntryPage { entries, next })
    }

    fn next_order_number(&mut self, tenant_id: TenantId) -> EngineResult<u64> {
        let row = self
            .handle
            .block_on(
                sqlx::query(
                    r#"
                    INSERT INTO order_counters (tenant_id, last_value)
                    VALUES ($1, 1)
                    ON CONFLICT (tenant_id)
                    DO UPDATE SET last_value = order_counters.last_value + 1
                    RETURNING last_value
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .fetch_one(&mut *self.tx),
            )
            .map_err(|e| map_sqlx_error("next_order_number", e))?;
        let value: i64 = row.try_get("last_value").map_err(row_decode_error)?;
        Ok(value as u64)
    }

    fn insert_order(&mut self, order: &Order) -> EngineResult<()> {
        let payload = to_payload(order)?;
        self.insert_document("orders", order.tenant_id, *order.id.0.as_uuid(), &payload)
    }

    fn order(&mut self, tenant_id: TenantId, id: OrderId) -> EngineResult<Option<Order>> {
        self.load_document("orders", tenant_id, *id.0.as_uuid())
    }

    fn update_order(&mut self, order: &Order) -> EngineResult<()> {
        let payload = to_payload(order)?;
        self.update_document("orders", order.tenant_id, *order.id.0.as_uuid(), &payload)
    }

    fn insert_transaction(&mut self, transaction: &FinancialTransaction) -> EngineResult<()> {
        let payload = to_payload(transaction)?;
        self.insert_document(
            "financial_transactions",
            transaction.tenant_id,
            *transaction.id.0.as_uuid(),
            &payload,
        )
    }

    fn transaction(
        &mut self,
        tenant_id: TenantId,
        id: TransactionId,
    ) -> EngineResult<Option<FinancialTransaction>> {
        self.load_document("financial_transactions", tenant_id, *id.0.as_uuid())
    }

    fn update_transaction(&mut self, transaction: &FinancialTransaction) -> EngineResult<()> {
        let payload = to_payload(transaction)?;
        self.update_document(
            "financial_transactions",
            transaction.tenant_id,
            *transaction.id.0.as_uuid(),
            &payload,
        )
    }

    fn insert_transfer(&mut self, transfer: &Transfer) -> EngineResult<()> {
        let payload = to_payload(transfer)?;
        self.insert_document(
            "transfers",
            transfer.tenant_id,
            *transfer.id.0.as_uuid(),
            &payload,
        )
    }

    fn transfer(
        &mut self,
        tenant_id: TenantId,
        id: TransferId,
    ) -> EngineResult<Option<Transfer>> {
        self.load_document("transfers", tenant_id, *id.0.as_uuid())
    }
}

fn to_payload<T: Serialize>(value: &T) -> EngineResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "failed to serialize payload");
        EngineError::Internal
    })
}

fn from_payload<T: DeserializeOwned>(value: serde_json::Value) -> EngineResult<T> {
    serde_json::from_value(value).map_err(|e| {
        tracing::error!(error = %e, "failed to deserialize payload");
        EngineError::Internal
    })
}

fn payload_column(row: &sqlx::postgres::PgRow) -> EngineResult<serde_json::Value> {
    row.try_get("payload").map_err(row_decode_error)
}

fn row_decode_error(err: sqlx::Error) -> EngineError {
    tracing::error!(error = %err, "failed to decode row");
    EngineError::Internal
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EngineError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") => EngineError::conflict(format!(
                "duplicate key in {operation}: {}",
                db_err.message()
            )),
            Some("40001") | Some("40P01") => EngineError::aborted(format!(
                "serialization failure in {operation}: {}",
                db_err.message()
            )),
            _ => {
                tracing::error!(operation, error = %db_err.message(), "database error");
                EngineError::Internal
            }
        },
        _ => {
            tracing::error!(operation, error = %err, "database error");
            EngineError::Internal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsledger_core::Money;
    use opsledger_ledger::SubjectValue;

    #[test]
    fn payloads_round_trip_through_json() {
        let subject = Subject::new(
            TenantId::new(),
            "checking",
            SubjectValue::account(Money::from_major(25), Money::ZERO),
        );
        let decoded: Subject = from_payload(to_payload(&subject).unwrap()).unwrap();
        assert_eq!(decoded, subject);
    }
}

//! Envelope queue operations.
//!
//! Invariants enforced here:
//!   - ciphertext and header bytes are immutable once inserted;
//!   - `delivered_at`, once set, never changes (the UPDATE is guarded
//!     by `delivered_at IS NULL`, which also makes marking idempotent);
//!   - `pending` and `history` order by `sent_at ASC, id ASC`.

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::db::Store;
use crate::error::StoreError;
use crate::models::EnvelopeRow;

const ENVELOPE_COLUMNS: &str = "id, conv_id, from_device_id, to_device_id, ciphertext, header, \
     sent_at, received_at, delivered_at, deleted_at";

/// A validated-on-insert envelope as submitted by the send endpoint.
#[derive(Debug, Clone)]
pub struct NewEnvelope {
    pub conv_id: String,
    pub from_device_id: String,
    pub to_device_id: String,
    pub ciphertext: Vec<u8>,
    pub header: serde_json::Value,
}

fn require_uuid(name: &str, value: &str) -> Result<(), StoreError> {
    Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| StoreError::InvalidRequest(format!("{name} is not a valid identifier")))
}

impl Store {
    /// Append one envelope. Validates routing identifiers and the
    /// structural shape of the opaque fields; never looks inside them.
    pub async fn enqueue(&self, env: NewEnvelope) -> Result<EnvelopeRow, StoreError> {
        require_uuid("conv_id", &env.conv_id)?;
        require_uuid("from_device_id", &env.from_device_id)?;
        require_uuid("to_device_id", &env.to_device_id)?;

        if env.ciphertext.is_empty() {
            return Err(StoreError::InvalidRequest("ciphertext is empty".into()));
        }
        let header_ok = match &env.header {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.is_empty(),
            _ => true,
        };
        if !header_ok {
            return Err(StoreError::InvalidRequest("header is empty".into()));
        }
        let header_text =
            serde_json::to_string(&env.header).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let row = EnvelopeRow {
            id: Uuid::new_v4().to_string(),
            conv_id: env.conv_id,
            from_device_id: env.from_device_id,
            to_device_id: env.to_device_id,
            ciphertext: env.ciphertext,
            header: header_text,
            sent_at: Utc::now(),
            received_at: None,
            delivered_at: None,
            deleted_at: None,
        };

        sqlx::query(
            "INSERT INTO envelopes \
                 (id, conv_id, from_device_id, to_device_id, ciphertext, header, sent_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.conv_id)
        .bind(&row.from_device_id)
        .bind(&row.to_device_id)
        .bind(&row.ciphertext)
        .bind(&row.header)
        .bind(row.sent_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(id = %row.id, to = %row.to_device_id, "envelope enqueued");
        Ok(row)
    }

    /// Up to `limit` undelivered envelopes for a device, oldest first.
    pub async fn pending(&self, to_device: &str, limit: i64) -> Result<Vec<EnvelopeRow>, StoreError> {
        let rows = sqlx::query_as::<_, EnvelopeRow>(&format!(
            "SELECT {ENVELOPE_COLUMNS} FROM envelopes \
             WHERE to_device_id = ? AND delivered_at IS NULL AND deleted_at IS NULL \
             ORDER BY sent_at ASC, id ASC LIMIT ?"
        ))
        .bind(to_device)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Set `delivered_at` for the given ids in one statement. Ids that
    /// are unknown or already delivered are left untouched, so the call
    /// is idempotent.
    pub async fn mark_delivered(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE envelopes SET delivered_at = ");
        builder.push_bind(Utc::now());
        builder.push(" WHERE delivered_at IS NULL AND id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        let result = builder.build().execute(&self.pool).await?;

        tracing::debug!(requested = ids.len(), marked = result.rows_affected(), "delivery marked");
        Ok(())
    }

    /// Distinct conversation ids the device participates in, as sender
    /// or recipient.
    pub async fn conversations(&self, device: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT conv_id FROM envelopes \
             WHERE (from_device_id = ? OR to_device_id = ?) AND deleted_at IS NULL \
             ORDER BY conv_id ASC",
        )
        .bind(device)
        .bind(device)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Envelopes addressed to `device`, optionally after `since` and
    /// filtered by conversation, ascending by send time.
    pub async fn history(
        &self,
        device: &str,
        since: Option<DateTime<Utc>>,
        conv_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<EnvelopeRow>, StoreError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
            "SELECT {ENVELOPE_COLUMNS} FROM envelopes WHERE to_device_id = "
        ));
        builder.push_bind(device);
        builder.push(" AND deleted_at IS NULL");
        if let Some(since) = since {
            builder.push(" AND sent_at > ");
            builder.push_bind(since);
        }
        if let Some(conv_id) = conv_id {
            builder.push(" AND conv_id = ");
            builder.push_bind(conv_id);
        }
        builder.push(" ORDER BY sent_at ASC, id ASC LIMIT ");
        builder.push_bind(limit);

        let rows = builder
            .build_query_as::<EnvelopeRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

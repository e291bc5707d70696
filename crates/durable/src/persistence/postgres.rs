//! The Postgres-backed message store: durable append, read, and pending-command
//! bookkeeping for one instance's stream, backed by a row-locked cursor table.
//!
//! Uses `sqlx::PgPool` with raw SQL and `Row::get`, a `SELECT ... FOR UPDATE`
//! on a per-instance cursor row to serialize position allocation, and a
//! conditional `UPDATE ... WHERE ... RETURNING` as a single-row compare-and-set
//! for claims.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::message::{Direction, Kind, PendingMessage, Position, WorkflowId, WorkflowMessage};

use super::store::{StoreError, WorkflowMessageStore};

/// Embedded schema, run once at pool setup. The teacher embeds its schema
/// directly in `postgres.rs` SQL strings rather than shipping a separate
/// migrations directory; this crate follows the same convention.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_messages (
    workflow_id   text NOT NULL,
    position      bigint NOT NULL,
    kind          text NOT NULL,
    direction     text NOT NULL,
    message_type  text NOT NULL,
    message_data  jsonb NOT NULL,
    processed     boolean,
    scheduled_delay_ms bigint,
    created_at    timestamptz NOT NULL DEFAULT now(),
    processed_at  timestamptz,
    PRIMARY KEY (workflow_id, position)
);

CREATE INDEX IF NOT EXISTS workflow_messages_pending_idx
    ON workflow_messages (workflow_id, position)
    WHERE kind = 'command' AND direction = 'output' AND processed = false;

CREATE TABLE IF NOT EXISTS workflow_cursors (
    workflow_id    text PRIMARY KEY,
    next_position  bigint NOT NULL DEFAULT 1
);
"#;

pub struct PostgresWorkflowMessageStore<I, O> {
    pool: PgPool,
    _marker: std::marker::PhantomData<fn() -> (I, O)>,
}

impl<I, O> PostgresWorkflowMessageStore<I, O> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _marker: std::marker::PhantomData,
        }
    }

    /// Run the embedded schema. Idempotent (`CREATE ... IF NOT EXISTS`).
    pub async fn run_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn kind_str(kind: Kind) -> &'static str {
    match kind {
        Kind::Command => "command",
        Kind::Event => "event",
    }
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Input => "input",
        Direction::Output => "output",
    }
}

fn parse_kind(s: &str) -> Result<Kind, StoreError> {
    match s {
        "command" => Ok(Kind::Command),
        "event" => Ok(Kind::Event),
        other => Err(StoreError::InvariantViolation(format!("unknown kind column value: {other}"))),
    }
}

fn parse_direction(s: &str) -> Result<Direction, StoreError> {
    match s {
        "input" => Ok(Direction::Input),
        "output" => Ok(Direction::Output),
        other => Err(StoreError::InvariantViolation(format!("unknown direction column value: {other}"))),
    }
}

#[async_trait]
impl<I, O> WorkflowMessageStore<I, O> for PostgresWorkflowMessageStore<I, O>
where
    I: Serialize + DeserializeOwned + Send + Sync + 'static,
    O: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[tracing::instrument(skip(self, messages), fields(workflow_id = %workflow_id, count = messages.len()))]
    async fn append(
        &self,
        workflow_id: &WorkflowId,
        messages: Vec<PendingMessage<I, O>>,
    ) -> Result<Position, StoreError> {
        if messages.is_empty() {
            return Err(StoreError::InvariantViolation(
                "append called with zero messages".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow_cursors (workflow_id, next_position) VALUES ($1, 1)
             ON CONFLICT (workflow_id) DO NOTHING",
        )
        .bind(workflow_id.as_str())
        .execute(&mut *tx)
        .await?;

        // Locks the instance's cursor row for the rest of the transaction:
        // the serialization point for concurrent appends to this instance.
        let next_position: i64 = sqlx::query_scalar(
            "SELECT next_position FROM workflow_cursors WHERE workflow_id = $1 FOR UPDATE",
        )
        .bind(workflow_id.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let mut position = next_position;
        for pending in &messages {
            let (message_type, message_data) = encode_payload(pending)?;
            let processed = match (pending.kind, pending.direction) {
                (Kind::Command, Direction::Output) => Some(false),
                _ => None,
            };
            let scheduled_delay_ms = pending.scheduled_delay.map(|d| d.as_millis() as i64);
            sqlx::query(
                "INSERT INTO workflow_messages
                    (workflow_id, position, kind, direction, message_type, message_data, processed, scheduled_delay_ms)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(workflow_id.as_str())
            .bind(position)
            .bind(kind_str(pending.kind))
            .bind(direction_str(pending.direction))
            .bind(message_type)
            .bind(message_data)
            .bind(processed)
            .bind(scheduled_delay_ms)
            .execute(&mut *tx)
            .await?;
            position += 1;
        }

        sqlx::query("UPDATE workflow_cursors SET next_position = $2 WHERE workflow_id = $1")
            .bind(workflow_id.as_str())
            .bind(position)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Position::new(position - 1))
    }

    async fn read_stream(
        &self,
        workflow_id: &WorkflowId,
        from_position: Position,
    ) -> Result<Vec<WorkflowMessage<I, O>>, StoreError> {
        let rows = sqlx::query(
            "SELECT workflow_id, position, kind, direction, message_data, processed, scheduled_delay_ms, created_at
             FROM workflow_messages
             WHERE workflow_id = $1 AND position >= $2
             ORDER BY position ASC",
        )
        .bind(workflow_id.as_str())
        .bind(from_position.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_message).collect()
    }

    async fn get_pending_commands(
        &self,
        workflow_id: Option<&WorkflowId>,
    ) -> Result<Vec<WorkflowMessage<I, O>>, StoreError> {
        let rows = match workflow_id {
            Some(id) => {
                sqlx::query(
                    "SELECT workflow_id, position, kind, direction, message_data, processed, scheduled_delay_ms, created_at
                     FROM workflow_messages
                     WHERE workflow_id = $1 AND kind = 'command' AND direction = 'output' AND processed = false
                     ORDER BY workflow_id ASC, position ASC",
                )
                .bind(id.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT workflow_id, position, kind, direction, message_data, processed, scheduled_delay_ms, created_at
                     FROM workflow_messages
                     WHERE kind = 'command' AND direction = 'output' AND processed = false
                     ORDER BY workflow_id ASC, position ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(row_to_message).collect()
    }

    #[tracing::instrument(skip(self), fields(workflow_id = %workflow_id, position = position.get()))]
    async fn mark_command_processed(
        &self,
        workflow_id: &WorkflowId,
        position: Position,
    ) -> Result<bool, StoreError> {
        // Succeeds only while the row is still an unprocessed output command;
        // the `WHERE ... processed = false` clause is the compare in compare-and-set.
        let row = sqlx::query(
            "UPDATE workflow_messages
             SET processed = true, processed_at = now()
             WHERE workflow_id = $1 AND position = $2
               AND kind = 'command' AND direction = 'output' AND processed = false
             RETURNING processed",
        )
        .bind(workflow_id.as_str())
        .bind(position.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn exists(&self, workflow_id: &WorkflowId) -> Result<bool, StoreError> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT true FROM workflow_messages WHERE workflow_id = $1 LIMIT 1",
        )
        .bind(workflow_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn delete(&self, workflow_id: &WorkflowId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM workflow_messages WHERE workflow_id = $1")
            .bind(workflow_id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM workflow_cursors WHERE workflow_id = $1")
            .bind(workflow_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Encodes a pending message's payload as `(message_type, message_data)` for
/// the `jsonb` column: `message_type` is the payload's serde tag, kept as a
/// denormalized column for operator queries/indexing even though the typed
/// enum already carries it.
fn encode_payload<I, O>(pending: &PendingMessage<I, O>) -> Result<(&'static str, serde_json::Value), StoreError>
where
    I: Serialize,
    O: Serialize,
{
    use crate::message::MessagePayload;

    let label = match &pending.message {
        MessagePayload::Input(_) => "input",
        MessagePayload::Output(_) => "output",
        MessagePayload::Audit(_) => "audit",
    };
    let value = serde_json::to_value(&pending.message)?;
    Ok((label, value))
}

fn row_to_message<I, O>(row: sqlx::postgres::PgRow) -> Result<WorkflowMessage<I, O>, StoreError>
where
    I: DeserializeOwned,
    O: DeserializeOwned,
{
    use crate::message::MessagePayload;

    let workflow_id: String = row.try_get("workflow_id")?;
    let position: i64 = row.try_get("position")?;
    let kind: String = row.try_get("kind")?;
    let direction: String = row.try_get("direction")?;
    let message_data: serde_json::Value = row.try_get("message_data")?;
    let processed: Option<bool> = row.try_get("processed")?;
    let scheduled_delay_ms: Option<i64> = row.try_get("scheduled_delay_ms")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    let message: MessagePayload<I, O> = serde_json::from_value(message_data)?;

    Ok(WorkflowMessage {
        workflow_id: WorkflowId::new(workflow_id),
        position: Position::new(position),
        kind: parse_kind(&kind)?,
        direction: parse_direction(&direction)?,
        message,
        scheduled_delay: scheduled_delay_ms.map(|ms| std::time::Duration::from_millis(ms as u64)),
        timestamp: created_at,
        processed,
    })
}

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Statement, Value};
use serde_json::Map;

use crate::{
    error::{TelemetryError, TelemetryResult},
    models::{EventRequest, GenerationRequest, ScoreRequest, SpanRequest, TraceRequest},
    store::TelemetryStore,
};

/// Schema the store writes to.
pub const SCHEMA_SQL: &str = include_str!("../migrations/001_telemetry.sql");

pub struct PgTelemetryStore {
    db: DatabaseConnection,
}

impl PgTelemetryStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn execute(&self, what: &str, sql: &str, values: Vec<Value>) -> TelemetryResult<()> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);
        self.db
            .execute_raw(stmt)
            .await
            .map_err(|e| TelemetryError::Database(format!("Failed to create {}: {}", what, e)))?;
        Ok(())
    }

    async fn exists(&self, table: &str, id: &str) -> TelemetryResult<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1) AS \"exists\"", table);
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [id.into()]);

        let row = self.db.query_one_raw(stmt).await?;
        match row {
            Some(row) => Ok(row.try_get::<bool>("", "exists")?),
            None => Ok(false),
        }
    }
}

/// Empty strings are stored as NULL for optional references.
fn nullable(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn metadata(value: &Option<Map<String, serde_json::Value>>) -> Option<serde_json::Value> {
    value.clone().map(serde_json::Value::Object)
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn create_trace(&self, trace: TraceRequest) -> TelemetryResult<()> {
        let sql = r#"
            INSERT INTO traces
                (id, project_id, name, metadata, tags, user_id, session_id, start_time, end_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#;

        self.execute(
            "trace",
            sql,
            vec![
                trace.id.clone().into(),
                nullable(&trace.project_id).into(),
                trace.name.into(),
                metadata(&trace.metadata).into(),
                trace.tags.into(),
                nullable(&trace.user_id).into(),
                nullable(&trace.session_id).into(),
                trace.start_time.into(),
                trace.end_time.into(),
            ],
        )
        .await?;

        tracing::debug!(trace_id = %trace.id, "Stored trace");
        Ok(())
    }

    async fn create_span(&self, span: SpanRequest) -> TelemetryResult<()> {
        let sql = r#"
            INSERT INTO spans (id, trace_id, parent_id, name, type, metadata, start_time, end_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;

        self.execute(
            "span",
            sql,
            vec![
                span.id.clone().into(),
                span.trace_id.into(),
                nullable(&span.parent_id).into(),
                span.name.into(),
                nullable(&span.span_type).into(),
                metadata(&span.metadata).into(),
                span.start_time.into(),
                span.end_time.into(),
            ],
        )
        .await?;

        tracing::debug!(span_id = %span.id, "Stored span");
        Ok(())
    }

    async fn create_generation(&self, generation: GenerationRequest) -> TelemetryResult<()> {
        let sql = r#"
            INSERT INTO generations (id, trace_id, name, input, output, model,
                                     prompt_tokens, completion_tokens, total_tokens,
                                     metadata, start_time, end_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#;

        let usage = generation.usage;
        self.execute(
            "generation",
            sql,
            vec![
                generation.id.clone().into(),
                generation.trace_id.into(),
                nullable(&generation.name).into(),
                generation.input.into(),
                nullable(&generation.output).into(),
                generation.model.into(),
                usage.map(|u| u.prompt_tokens).into(),
                usage.map(|u| u.completion_tokens).into(),
                usage.map(|u| u.total_tokens).into(),
                metadata(&generation.metadata).into(),
                generation.start_time.into(),
                generation.end_time.into(),
            ],
        )
        .await?;

        tracing::debug!(generation_id = %generation.id, "Stored generation");
        Ok(())
    }

    async fn create_event(&self, event: EventRequest) -> TelemetryResult<()> {
        let sql = r#"
            INSERT INTO events (id, trace_id, span_id, name, level, message, metadata, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;

        self.execute(
            "event",
            sql,
            vec![
                event.id.into(),
                event.trace_id.into(),
                nullable(&event.span_id).into(),
                event.name.into(),
                nullable(&event.level).into(),
                event.message.into(),
                metadata(&event.metadata).into(),
                event.timestamp.into(),
            ],
        )
        .await
    }

    async fn create_score(&self, score: ScoreRequest) -> TelemetryResult<()> {
        let sql = r#"
            INSERT INTO scores
                (id, trace_id, generation_id, name, value, source, comment, metadata, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#;

        self.execute(
            "score",
            sql,
            vec![
                score.id.into(),
                nullable(&score.trace_id).into(),
                nullable(&score.generation_id).into(),
                score.name.into(),
                score.value.into(),
                nullable(&score.source).into(),
                nullable(&score.comment).into(),
                metadata(&score.metadata).into(),
                score.timestamp.into(),
            ],
        )
        .await
    }

    async fn trace_exists(&self, trace_id: &str) -> TelemetryResult<bool> {
        self.exists("traces", trace_id).await
    }

    async fn span_exists(&self, span_id: &str) -> TelemetryResult<bool> {
        self.exists("spans", span_id).await
    }

    async fn generation_exists(&self, generation_id: &str) -> TelemetryResult<bool> {
        self.exists("generations", generation_id).await
    }
}

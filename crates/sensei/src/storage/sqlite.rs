//! SQLite persistence
//!
//! One database file backs all four collections. Nested structures are
//! stored as JSON TEXT columns; status transitions are conditional UPDATEs
//! (`WHERE id = ? AND status = ?`) so the compare-and-swap semantics match
//! the in-memory stores exactly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::adaptation::{
    AdaptationFilter, AdaptationId, AdaptationRecord, AdaptationStatus, AdaptationStore,
};
use crate::error::{ErrorDetail, PipelineError, PipelineResult};
use crate::pipeline::{PipelineRun, RunId, RunStore};
use crate::registry::{
    CertificationContent, ChunkId, ContentChunk, ContentFilter, ContentId, ContentStatus,
    ContentStore,
};
use crate::training::{
    CapabilityManifest, JobFilter, JobStatus, ModelArtifact, TrainingId, TrainingJob,
    TrainingJobStore,
};

/// SQLite-backed store implementing every pipeline storage trait
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub async fn connect(db_path: &Path) -> PipelineResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal);

        let pool = sqlx::SqlitePool::connect_with(options).await.map_err(|e| {
            PipelineError::storage(format!(
                "failed to open sqlite database at '{}': {e}",
                db_path.display()
            ))
        })?;

        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn create_tables(&self) -> PipelineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS certification_content (
                id TEXT PRIMARY KEY,
                source_path TEXT NOT NULL,
                certification_name TEXT NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_chunks (
                id TEXT PRIMARY KEY,
                content_id TEXT NOT NULL,
                text TEXT NOT NULL,
                embedding TEXT NOT NULL,
                sequence_index INTEGER NOT NULL,
                metadata TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS training_jobs (
                id TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                content_ids TEXT NOT NULL,
                config TEXT NOT NULL,
                status TEXT NOT NULL,
                artifact TEXT,
                manifest TEXT,
                error TEXT,
                retry_of TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS adaptations (
                id TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                training_id TEXT NOT NULL,
                integration_points TEXT NOT NULL,
                adapted_agent_classes TEXT NOT NULL,
                knowledge_weight REAL NOT NULL,
                confidence_threshold REAL NOT NULL,
                blend TEXT NOT NULL,
                warnings TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL,
                applied_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                id TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                certification_name TEXT NOT NULL,
                stage TEXT NOT NULL,
                content_id TEXT,
                training_id TEXT,
                adaptation_id TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_content_role_status ON certification_content(role, status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_content ON content_chunks(content_id, sequence_index)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_role_status ON training_jobs(role, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_adaptations_role ON adaptations(role, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_training ON pipeline_runs(training_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn parse_uuid(value: &str) -> PipelineResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| PipelineError::storage(format!("bad uuid '{value}': {e}")))
}

fn parse_timestamp(value: &str) -> PipelineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PipelineError::storage(format!("bad timestamp '{value}': {e}")))
}

fn parse_opt_timestamp(value: Option<String>) -> PipelineResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

fn parse_opt_json<T: DeserializeOwned>(value: Option<String>) -> PipelineResult<Option<T>> {
    value
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(PipelineError::from)
}

fn parse_status<T: std::str::FromStr>(value: &str, what: &str) -> PipelineResult<T> {
    value
        .parse()
        .map_err(|_| PipelineError::storage(format!("bad {what} '{value}'")))
}

fn content_from_row(row: &SqliteRow) -> PipelineResult<CertificationContent> {
    Ok(CertificationContent {
        id: ContentId(parse_uuid(&row.get::<String, _>("id"))?),
        source_path: row.get("source_path"),
        certification_name: row.get("certification_name"),
        role: row.get("role"),
        status: parse_status(&row.get::<String, _>("status"), "content status")?,
        error: parse_opt_json(row.get::<Option<String>, _>("error"))?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> PipelineResult<ContentChunk> {
    Ok(ContentChunk {
        id: ChunkId(parse_uuid(&row.get::<String, _>("id"))?),
        content_id: ContentId(parse_uuid(&row.get::<String, _>("content_id"))?),
        text: row.get("text"),
        embedding: serde_json::from_str(&row.get::<String, _>("embedding"))?,
        sequence_index: row.get::<i64, _>("sequence_index") as usize,
        metadata: serde_json::from_str(&row.get::<String, _>("metadata"))?,
    })
}

fn job_from_row(row: &SqliteRow) -> PipelineResult<TrainingJob> {
    Ok(TrainingJob {
        id: TrainingId(parse_uuid(&row.get::<String, _>("id"))?),
        role: row.get("role"),
        content_ids: serde_json::from_str(&row.get::<String, _>("content_ids"))?,
        config: serde_json::from_str(&row.get::<String, _>("config"))?,
        status: parse_status(&row.get::<String, _>("status"), "job status")?,
        artifact: parse_opt_json(row.get::<Option<String>, _>("artifact"))?,
        manifest: parse_opt_json(row.get::<Option<String>, _>("manifest"))?,
        error: parse_opt_json(row.get::<Option<String>, _>("error"))?,
        retry_of: row
            .get::<Option<String>, _>("retry_of")
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(TrainingId),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        started_at: parse_opt_timestamp(row.get::<Option<String>, _>("started_at"))?,
        completed_at: parse_opt_timestamp(row.get::<Option<String>, _>("completed_at"))?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
    })
}

fn adaptation_from_row(row: &SqliteRow) -> PipelineResult<AdaptationRecord> {
    Ok(AdaptationRecord {
        id: AdaptationId(parse_uuid(&row.get::<String, _>("id"))?),
        role: row.get("role"),
        training_id: TrainingId(parse_uuid(&row.get::<String, _>("training_id"))?),
        integration_points: serde_json::from_str(&row.get::<String, _>("integration_points"))?,
        adapted_agent_classes: serde_json::from_str(
            &row.get::<String, _>("adapted_agent_classes"),
        )?,
        knowledge_weight: row.get("knowledge_weight"),
        confidence_threshold: row.get("confidence_threshold"),
        blend: parse_status(&row.get::<String, _>("blend"), "blend kind")?,
        warnings: serde_json::from_str(&row.get::<String, _>("warnings"))?,
        status: parse_status(&row.get::<String, _>("status"), "adaptation status")?,
        error: parse_opt_json(row.get::<Option<String>, _>("error"))?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        applied_at: parse_opt_timestamp(row.get::<Option<String>, _>("applied_at"))?,
    })
}

fn run_from_row(row: &SqliteRow) -> PipelineResult<PipelineRun> {
    Ok(PipelineRun {
        id: RunId(parse_uuid(&row.get::<String, _>("id"))?),
        role: row.get("role"),
        certification_name: row.get("certification_name"),
        stage: parse_status(&row.get::<String, _>("stage"), "pipeline stage")?,
        content_id: row
            .get::<Option<String>, _>("content_id")
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(ContentId),
        training_id: row
            .get::<Option<String>, _>("training_id")
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(TrainingId),
        adaptation_id: row
            .get::<Option<String>, _>("adaptation_id")
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(AdaptationId),
        error: parse_opt_json(row.get::<Option<String>, _>("error"))?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
    })
}

fn json_opt<T: serde::Serialize>(value: &Option<T>) -> PipelineResult<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(PipelineError::from)
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn insert_content(&self, content: CertificationContent) -> PipelineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO certification_content (
                id, source_path, certification_name, role, status, error,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(content.id.to_string())
        .bind(&content.source_path)
        .bind(&content.certification_name)
        .bind(&content.role)
        .bind(content.status.to_string())
        .bind(json_opt(&content.error)?)
        .bind(content.created_at.to_rfc3339())
        .bind(content.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_content(&self, id: ContentId) -> PipelineResult<Option<CertificationContent>> {
        let row = sqlx::query("SELECT * FROM certification_content WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(content_from_row).transpose()
    }

    async fn list_content(
        &self,
        filter: &ContentFilter,
    ) -> PipelineResult<Vec<CertificationContent>> {
        let mut query = String::from("SELECT * FROM certification_content WHERE 1=1");
        let mut bindings = Vec::new();
        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.to_string());
        }
        if let Some(ref role) = filter.role {
            query.push_str(" AND role = ?");
            bindings.push(role.clone());
        }
        query.push_str(" ORDER BY created_at, id");

        let mut query_builder = sqlx::query(&query);
        for binding in bindings {
            query_builder = query_builder.bind(binding);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;
        rows.iter().map(content_from_row).collect()
    }

    async fn compare_and_set_status(
        &self,
        id: ContentId,
        from: ContentStatus,
        to: ContentStatus,
        error: Option<ErrorDetail>,
    ) -> PipelineResult<bool> {
        let result = sqlx::query(
            "UPDATE certification_content SET status = ?, error = ?, updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(to.to_string())
        .bind(json_opt(&error)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(from.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_chunks(&self, chunks: &[ContentChunk]) -> PipelineResult<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO content_chunks (
                    id, content_id, text, embedding, sequence_index, metadata
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(chunk.id.to_string())
            .bind(chunk.content_id.to_string())
            .bind(&chunk.text)
            .bind(serde_json::to_string(&chunk.embedding)?)
            .bind(chunk.sequence_index as i64)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_chunks(&self, content_id: ContentId) -> PipelineResult<usize> {
        let result = sqlx::query("DELETE FROM content_chunks WHERE content_id = ?")
            .bind(content_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn get_chunks(&self, content_id: ContentId) -> PipelineResult<Vec<ContentChunk>> {
        let rows =
            sqlx::query("SELECT * FROM content_chunks WHERE content_id = ? ORDER BY sequence_index")
                .bind(content_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn count_chunks(&self, content_id: ContentId) -> PipelineResult<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM content_chunks WHERE content_id = ?")
                .bind(content_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }
}

#[async_trait]
impl TrainingJobStore for SqliteStore {
    async fn insert_job(&self, job: TrainingJob) -> PipelineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO training_jobs (
                id, role, content_ids, config, status, artifact, manifest,
                error, retry_of, created_at, started_at, completed_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.role)
        .bind(serde_json::to_string(&job.content_ids)?)
        .bind(serde_json::to_string(&job.config)?)
        .bind(job.status.to_string())
        .bind(json_opt(&job.artifact)?)
        .bind(json_opt(&job.manifest)?)
        .bind(json_opt(&job.error)?)
        .bind(job.retry_of.map(|id| id.to_string()))
        .bind(job.created_at.to_rfc3339())
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: TrainingId) -> PipelineResult<Option<TrainingJob>> {
        let row = sqlx::query("SELECT * FROM training_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter) -> PipelineResult<Vec<TrainingJob>> {
        let mut query = String::from("SELECT * FROM training_jobs WHERE 1=1");
        let mut bindings = Vec::new();
        if let Some(ref role) = filter.role {
            query.push_str(" AND role = ?");
            bindings.push(role.clone());
        }
        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.to_string());
        }
        query.push_str(" ORDER BY created_at, id");

        let mut query_builder = sqlx::query(&query);
        for binding in bindings {
            query_builder = query_builder.bind(binding);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn compare_and_set_job_status(
        &self,
        id: TrainingId,
        from: JobStatus,
        to: JobStatus,
    ) -> PipelineResult<bool> {
        let now = Utc::now().to_rfc3339();
        // Leaving queued is the moment execution starts
        let result = if from == JobStatus::Queued {
            sqlx::query(
                "UPDATE training_jobs SET status = ?, started_at = ?, updated_at = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(to.to_string())
            .bind(&now)
            .bind(&now)
            .bind(id.to_string())
            .bind(from.to_string())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                "UPDATE training_jobs SET status = ?, updated_at = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(to.to_string())
            .bind(&now)
            .bind(id.to_string())
            .bind(from.to_string())
            .execute(&self.pool)
            .await?
        };
        Ok(result.rows_affected() > 0)
    }

    async fn complete_job(
        &self,
        id: TrainingId,
        artifact: ModelArtifact,
        manifest: CapabilityManifest,
    ) -> PipelineResult<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE training_jobs SET status = ?, artifact = ?, manifest = ?, \
             completed_at = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(JobStatus::Completed.to_string())
        .bind(serde_json::to_string(&artifact)?)
        .bind(serde_json::to_string(&manifest)?)
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .bind(JobStatus::Training.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail_job(
        &self,
        id: TrainingId,
        from: JobStatus,
        error: ErrorDetail,
    ) -> PipelineResult<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE training_jobs SET status = ?, error = ?, completed_at = ?, updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(JobStatus::Failed.to_string())
        .bind(serde_json::to_string(&error)?)
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .bind(from.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AdaptationStore for SqliteStore {
    async fn insert_record(&self, record: AdaptationRecord) -> PipelineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO adaptations (
                id, role, training_id, integration_points, adapted_agent_classes,
                knowledge_weight, confidence_threshold, blend, warnings, status,
                error, created_at, applied_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.role)
        .bind(record.training_id.to_string())
        .bind(serde_json::to_string(&record.integration_points)?)
        .bind(serde_json::to_string(&record.adapted_agent_classes)?)
        .bind(record.knowledge_weight)
        .bind(record.confidence_threshold)
        .bind(record.blend.to_string())
        .bind(serde_json::to_string(&record.warnings)?)
        .bind(record.status.to_string())
        .bind(json_opt(&record.error)?)
        .bind(record.created_at.to_rfc3339())
        .bind(record.applied_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_record(&self, id: AdaptationId) -> PipelineResult<Option<AdaptationRecord>> {
        let row = sqlx::query("SELECT * FROM adaptations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(adaptation_from_row).transpose()
    }

    async fn list_records(
        &self,
        filter: &AdaptationFilter,
    ) -> PipelineResult<Vec<AdaptationRecord>> {
        let mut query = String::from("SELECT * FROM adaptations WHERE 1=1");
        let mut bindings = Vec::new();
        if let Some(ref role) = filter.role {
            query.push_str(" AND role = ?");
            bindings.push(role.clone());
        }
        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.to_string());
        }
        query.push_str(" ORDER BY created_at, id");

        let mut query_builder = sqlx::query(&query);
        for binding in bindings {
            query_builder = query_builder.bind(binding);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;
        rows.iter().map(adaptation_from_row).collect()
    }

    async fn mark_applied(
        &self,
        id: AdaptationId,
        adapted_agent_classes: Vec<String>,
    ) -> PipelineResult<bool> {
        let result = sqlx::query(
            "UPDATE adaptations SET status = ?, adapted_agent_classes = ?, applied_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(AdaptationStatus::Applied.to_string())
        .bind(serde_json::to_string(&adapted_agent_classes)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(AdaptationStatus::Pending.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: AdaptationId, error: ErrorDetail) -> PipelineResult<bool> {
        let result = sqlx::query(
            "UPDATE adaptations SET status = ?, error = ? WHERE id = ? AND status = ?",
        )
        .bind(AdaptationStatus::Failed.to_string())
        .bind(serde_json::to_string(&error)?)
        .bind(id.to_string())
        .bind(AdaptationStatus::Pending.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn insert_run(&self, run: PipelineRun) -> PipelineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (
                id, role, certification_name, stage, content_id, training_id,
                adaptation_id, error, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.role)
        .bind(&run.certification_name)
        .bind(run.stage.to_string())
        .bind(run.content_id.map(|id| id.to_string()))
        .bind(run.training_id.map(|id| id.to_string()))
        .bind(run.adaptation_id.map(|id| id.to_string()))
        .bind(json_opt(&run.error)?)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> PipelineResult<Option<PipelineRun>> {
        let row = sqlx::query("SELECT * FROM pipeline_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn find_run_by_training(
        &self,
        training_id: TrainingId,
    ) -> PipelineResult<Option<PipelineRun>> {
        let row = sqlx::query("SELECT * FROM pipeline_runs WHERE training_id = ? LIMIT 1")
            .bind(training_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn list_runs(&self) -> PipelineResult<Vec<PipelineRun>> {
        let rows = sqlx::query("SELECT * FROM pipeline_runs ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn update_run(&self, run: PipelineRun) -> PipelineResult<()> {
        let result = sqlx::query(
            "UPDATE pipeline_runs SET stage = ?, content_id = ?, training_id = ?, \
             adaptation_id = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(run.stage.to_string())
        .bind(run.content_id.map(|id| id.to_string()))
        .bind(run.training_id.map(|id| id.to_string()))
        .bind(run.adaptation_id.map(|id| id.to_string()))
        .bind(json_opt(&run.error)?)
        .bind(run.updated_at.to_rfc3339())
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::storage(format!(
                "pipeline run {} does not exist",
                run.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::PipelineStage;
    use crate::training::{Capability, ModelType, TrainingConfig};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    async fn store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::connect(&dir.path().join("pipeline.db"))
            .await
            .unwrap();
        (store, dir)
    }

    fn sample_manifest() -> CapabilityManifest {
        let mut capabilities = BTreeMap::new();
        capabilities.insert(
            "risk".to_string(),
            Capability {
                confidence: 0.9,
                description: "knowledge of risk".to_string(),
                source_chunks: 3,
            },
        );
        CapabilityManifest { capabilities }
    }

    fn sample_artifact() -> ModelArtifact {
        ModelArtifact {
            reference: "specialized/project_manager/abc123def456".to_string(),
            digest: "ab".repeat(32),
            model_type: ModelType::Specialized,
            chunk_count: 3,
        }
    }

    #[tokio::test]
    async fn test_content_roundtrip_and_cas() {
        let (store, _dir) = store().await;
        let content = CertificationContent::new("/tmp/pmp.md", "PMP Module 1", "project_manager");
        let id = content.id;
        store.insert_content(content).await.unwrap();

        let fetched = store.get_content(id).await.unwrap().unwrap();
        assert_eq!(fetched.source_path, "/tmp/pmp.md");
        assert_eq!(fetched.status, ContentStatus::Registered);
        assert!(fetched.error.is_none());

        // Wrong `from` loses without touching the row
        assert!(!store
            .compare_and_set_status(id, ContentStatus::Processing, ContentStatus::Processed, None)
            .await
            .unwrap());
        assert!(store
            .compare_and_set_status(id, ContentStatus::Registered, ContentStatus::Processing, None)
            .await
            .unwrap());
        assert!(store
            .compare_and_set_status(
                id,
                ContentStatus::Processing,
                ContentStatus::Failed,
                Some(ErrorDetail::new(ErrorKind::Provider, "model gone")),
            )
            .await
            .unwrap());

        let failed = store.get_content(id).await.unwrap().unwrap();
        assert_eq!(failed.status, ContentStatus::Failed);
        assert_eq!(failed.error.unwrap().kind, ErrorKind::Provider);

        let listed = store
            .list_content(&ContentFilter::default().with_role("project_manager"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(store
            .list_content(&ContentFilter::default().with_status(ContentStatus::Processed))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_chunk_lifecycle() {
        let (store, _dir) = store().await;
        let content_id = ContentId::new();
        let chunks: Vec<ContentChunk> = (0..3)
            .map(|i| {
                ContentChunk::new(content_id, format!("chunk {i}"), i)
                    .with_embedding(vec![i as f32, 1.0])
                    .with_metadata("section", serde_json::json!("Risk"))
            })
            .collect();
        store.put_chunks(&chunks).await.unwrap();

        assert_eq!(store.count_chunks(content_id).await.unwrap(), 3);
        let fetched = store.get_chunks(content_id).await.unwrap();
        assert_eq!(fetched.len(), 3);
        assert_eq!(fetched[0].text, "chunk 0");
        assert_eq!(fetched[2].sequence_index, 2);
        assert_eq!(fetched[1].embedding, vec![1.0, 1.0]);
        assert_eq!(fetched[0].metadata["section"], serde_json::json!("Risk"));

        assert_eq!(store.delete_chunks(content_id).await.unwrap(), 3);
        assert_eq!(store.count_chunks(content_id).await.unwrap(), 0);
        assert_eq!(store.delete_chunks(content_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let (store, _dir) = store().await;
        let job = TrainingJob::new(
            "project_manager",
            vec![ContentId::new()],
            TrainingConfig::default(),
        );
        let id = job.id;
        store.insert_job(job).await.unwrap();

        assert!(store
            .compare_and_set_job_status(id, JobStatus::Queued, JobStatus::Collecting)
            .await
            .unwrap());
        let started = store.get_job(id).await.unwrap().unwrap();
        assert!(started.started_at.is_some());

        assert!(store
            .compare_and_set_job_status(id, JobStatus::Collecting, JobStatus::Training)
            .await
            .unwrap());
        assert!(store
            .complete_job(id, sample_artifact(), sample_manifest())
            .await
            .unwrap());
        // Already completed
        assert!(!store
            .complete_job(id, sample_artifact(), sample_manifest())
            .await
            .unwrap());

        let completed = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(completed.artifact.unwrap().chunk_count, 3);
        assert_eq!(completed.manifest.unwrap().capabilities.len(), 1);

        let listed = store
            .list_jobs(&JobFilter::default().with_status(JobStatus::Completed))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_job_records_error_verbatim() {
        let (store, _dir) = store().await;
        let job = TrainingJob::new(
            "project_manager",
            vec![ContentId::new()],
            TrainingConfig::default(),
        );
        let id = job.id;
        store.insert_job(job).await.unwrap();

        assert!(!store
            .fail_job(
                id,
                JobStatus::Training,
                ErrorDetail::new(ErrorKind::Timeout, "wrong from"),
            )
            .await
            .unwrap());
        assert!(store
            .fail_job(
                id,
                JobStatus::Queued,
                ErrorDetail::new(ErrorKind::Cancelled, "training job was cancelled"),
            )
            .await
            .unwrap());

        let failed = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        let error = failed.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Cancelled);
        assert_eq!(error.message, "training job was cancelled");
    }

    #[tokio::test]
    async fn test_adaptation_roundtrip() {
        let (store, _dir) = store().await;
        let record = AdaptationRecord::new(
            "project_manager",
            TrainingId::new(),
            vec![crate::adaptation::IntegrationPoint::DecisionMaking],
            0.7,
            0.3,
            crate::adaptation::BlendKind::Linear,
            vec!["knowledge_weight 1.7 clamped to 1".to_string()],
        );
        let id = record.id;
        store.insert_record(record).await.unwrap();

        assert!(store
            .mark_applied(id, vec!["ProjectManagerAgent".to_string()])
            .await
            .unwrap());
        let applied = store.get_record(id).await.unwrap().unwrap();
        assert_eq!(applied.status, AdaptationStatus::Applied);
        assert!(applied.applied_at.is_some());
        assert_eq!(applied.warnings.len(), 1);
        assert_eq!(
            applied.adapted_agent_classes,
            vec!["ProjectManagerAgent".to_string()]
        );

        // No longer pending
        assert!(!store
            .mark_failed(id, ErrorDetail::new(ErrorKind::RoleNotFound, "late"))
            .await
            .unwrap());

        let listed = store
            .list_records(&AdaptationFilter::default().with_role("project_manager"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_run_roundtrip() {
        let (store, _dir) = store().await;
        let mut run = PipelineRun::new("project_manager", "PMP Module 1");
        let run_id = run.id;
        store.insert_run(run.clone()).await.unwrap();

        let training_id = TrainingId::new();
        run.training_id = Some(training_id);
        run.advance(PipelineStage::ModelTrained);
        store.update_run(run.clone()).await.unwrap();

        let fetched = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(fetched.stage, PipelineStage::ModelTrained);
        assert_eq!(fetched.training_id, Some(training_id));

        let by_training = store
            .find_run_by_training(training_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_training.id, run_id);

        run.fail(ErrorDetail::new(ErrorKind::RoleNotFound, "no classes"));
        store.update_run(run).await.unwrap();
        let failed = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(failed.stage, PipelineStage::Failed);
        let error = failed.error.unwrap();
        assert_eq!(error.stage, PipelineStage::ModelTrained);
        assert_eq!(error.detail.kind, ErrorKind::RoleNotFound);

        assert_eq!(store.list_runs().await.unwrap().len(), 1);

        let orphan = PipelineRun::new("analyst", "CFA Level 1");
        assert!(store.update_run(orphan).await.is_err());
    }
}

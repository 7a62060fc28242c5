use crate::error::{AppError, Result};
use crate::models::{Assessment, AssessmentAnswer, AssessmentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Persistence port for assessments and their answers.
#[async_trait]
pub trait AssessmentRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Assessment>>;

    async fn create(&self, assessment: &Assessment) -> Result<Assessment>;

    /// Inserts or overwrites the answer for `(assessment_id, question_id)`.
    async fn upsert_answer(&self, answer: &AssessmentAnswer) -> Result<AssessmentAnswer>;

    async fn list_answers(&self, assessment_id: Uuid) -> Result<Vec<AssessmentAnswer>>;

    /// Moves an in-progress assessment to completed. Returns `None` when it was not in progress.
    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Assessment>>;
}

/// Repository for assessments stored in PostgreSQL.
pub struct PgAssessmentRepository {
    pool: PgPool,
}

impl PgAssessmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssessmentRepository for PgAssessmentRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Assessment>> {
        let row = sqlx::query_as::<_, Assessment>(
            r#"
            SELECT id, user_id, funnel_slug, status, created_at, completed_at
            FROM assessments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    async fn create(&self, assessment: &Assessment) -> Result<Assessment> {
        let row = sqlx::query_as::<_, Assessment>(
            r#"
            INSERT INTO assessments (id, user_id, funnel_slug, status, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, funnel_slug, status, created_at, completed_at
            "#,
        )
        .bind(assessment.id)
        .bind(assessment.user_id)
        .bind(&assessment.funnel_slug)
        .bind(assessment.status)
        .bind(assessment.created_at)
        .bind(assessment.completed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    async fn upsert_answer(&self, answer: &AssessmentAnswer) -> Result<AssessmentAnswer> {
        let row = sqlx::query_as::<_, AssessmentAnswer>(
            r#"
            INSERT INTO assessment_answers (id, assessment_id, step_id, question_id, answer_value, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (assessment_id, question_id) DO UPDATE SET
                step_id = EXCLUDED.step_id,
                answer_value = EXCLUDED.answer_value,
                updated_at = EXCLUDED.updated_at
            RETURNING id, assessment_id, step_id, question_id, answer_value, created_at, updated_at
            "#,
        )
        .bind(answer.id)
        .bind(answer.assessment_id)
        .bind(&answer.step_id)
        .bind(&answer.question_id)
        .bind(answer.answer_value)
        .bind(answer.created_at)
        .bind(answer.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    async fn list_answers(&self, assessment_id: Uuid) -> Result<Vec<AssessmentAnswer>> {
        let rows = sqlx::query_as::<_, AssessmentAnswer>(
            r#"
            SELECT id, assessment_id, step_id, question_id, answer_value, created_at, updated_at
            FROM assessment_answers
            WHERE assessment_id = $1
            ORDER BY created_at ASC, question_id ASC
            "#,
        )
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Assessment>> {
        let row = sqlx::query_as::<_, Assessment>(
            r#"
            UPDATE assessments
            SET status = 'completed', completed_at = $2
            WHERE id = $1 AND status = 'in_progress'
            RETURNING id, user_id, funnel_slug, status, created_at, completed_at
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}

/// In-memory repository for tests and database-less local runs.
#[derive(Debug, Default)]
pub struct InMemoryAssessmentRepository {
    assessments: RwLock<HashMap<Uuid, Assessment>>,
    answers: RwLock<Vec<AssessmentAnswer>>,
}

fn poisoned() -> AppError {
    AppError::Internal(anyhow::anyhow!("assessment repository lock poisoned"))
}

impl InMemoryAssessmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssessmentRepository for InMemoryAssessmentRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Assessment>> {
        let assessments = self.assessments.read().map_err(|_| poisoned())?;
        Ok(assessments.get(&id).cloned())
    }

    async fn create(&self, assessment: &Assessment) -> Result<Assessment> {
        let mut assessments = self.assessments.write().map_err(|_| poisoned())?;
        if assessments.contains_key(&assessment.id) {
            return Err(AppError::StateConflict(format!(
                "Assessment {} already exists",
                assessment.id
            )));
        }
        assessments.insert(assessment.id, assessment.clone());
        Ok(assessment.clone())
    }

    async fn upsert_answer(&self, answer: &AssessmentAnswer) -> Result<AssessmentAnswer> {
        let mut answers = self.answers.write().map_err(|_| poisoned())?;
        if let Some(existing) = answers.iter_mut().find(|a| {
            a.assessment_id == answer.assessment_id && a.question_id == answer.question_id
        }) {
            existing.step_id = answer.step_id.clone();
            existing.answer_value = answer.answer_value;
            existing.updated_at = answer.updated_at;
            return Ok(existing.clone());
        }
        answers.push(answer.clone());
        Ok(answer.clone())
    }

    async fn list_answers(&self, assessment_id: Uuid) -> Result<Vec<AssessmentAnswer>> {
        let answers = self.answers.read().map_err(|_| poisoned())?;
        Ok(answers
            .iter()
            .filter(|a| a.assessment_id == assessment_id)
            .cloned()
            .collect())
    }

    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Assessment>> {
        let mut assessments = self.assessments.write().map_err(|_| poisoned())?;
        match assessments.get_mut(&id) {
            Some(assessment) if assessment.status == AssessmentStatus::InProgress => {
                assessment.complete(at);
                Ok(Some(assessment.clone()))
            }
            _ => Ok(None),
        }
    }
}

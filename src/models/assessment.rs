use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle state of an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "assessment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    /// Answers may still be saved.
    InProgress,
    /// Submitted; answers are frozen.
    Completed,
}

impl AssessmentStatus {
    pub fn accepts_answers(&self) -> bool {
        matches!(self, AssessmentStatus::InProgress)
    }
}

/// A patient's run through a questionnaire funnel.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assessment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub funnel_slug: String,
    pub status: AssessmentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assessment {
    pub fn new(user_id: Uuid, funnel_slug: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            funnel_slug: funnel_slug.into(),
            status: AssessmentStatus::InProgress,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    /// Marks the assessment completed.
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = AssessmentStatus::Completed;
        self.completed_at = Some(at);
    }
}

/// A single answer to a funnel question. One row per question per assessment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AssessmentAnswer {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub step_id: String,
    pub question_id: String,
    pub answer_value: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssessmentAnswer {
    pub fn new(
        assessment_id: Uuid,
        step_id: impl Into<String>,
        question_id: impl Into<String>,
        answer_value: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            assessment_id,
            step_id: step_id.into(),
            question_id: question_id.into(),
            answer_value,
            created_at: now,
            updated_at: now,
        }
    }
}

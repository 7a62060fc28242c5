use crate::api::requests::{CreateAssessmentRequest, SaveAnswerRequest};
use crate::error::{AppError, Result};
use crate::models::{Assessment, AssessmentAnswer};
use crate::observability::get_metrics;
use crate::repositories::AssessmentRepository;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Service for assessment answer operations.
#[derive(Clone)]
pub struct AssessmentService {
    repo: Arc<dyn AssessmentRepository>,
}

impl AssessmentService {
    pub fn new(repo: Arc<dyn AssessmentRepository>) -> Self {
        Self { repo }
    }

    /// Starts a new assessment for the caller.
    pub async fn create_assessment(
        &self,
        user_id: Uuid,
        request: CreateAssessmentRequest,
    ) -> Result<Assessment> {
        let request = CreateAssessmentRequest {
            funnel_slug: request.funnel_slug.trim().to_string(),
        };
        request.validate()?;

        let assessment = Assessment::new(user_id, request.funnel_slug);
        let created = self.repo.create(&assessment).await?;

        tracing::info!(
            assessment_id = %created.id,
            funnel = %created.funnel_slug,
            "assessment started"
        );
        Ok(created)
    }

    /// Loads an assessment the caller owns.
    pub async fn get_owned(&self, user_id: Uuid, assessment_id: Uuid) -> Result<Assessment> {
        let assessment = self
            .repo
            .find_by_id(assessment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Assessment {} not found", assessment_id)))?;

        if !assessment.is_owned_by(user_id) {
            return Err(AppError::Forbidden(
                "Assessment belongs to another user".to_string(),
            ));
        }

        Ok(assessment)
    }

    /// Saves (or overwrites) one answer of an in-progress assessment.
    pub async fn save_answer(
        &self,
        user_id: Uuid,
        assessment_id: Uuid,
        request: SaveAnswerRequest,
    ) -> Result<AssessmentAnswer> {
        request.validate()?;

        let assessment = self.get_owned(user_id, assessment_id).await?;
        if !assessment.status.accepts_answers() {
            return Err(AppError::StateConflict(
                "Assessment is already completed".to_string(),
            ));
        }

        let answer = AssessmentAnswer::new(
            assessment.id,
            request.step_id,
            request.question_id,
            request.answer_value,
        );
        let saved = self.repo.upsert_answer(&answer).await?;

        get_metrics().record_answer_saved(&assessment.funnel_slug);
        tracing::debug!(
            assessment_id = %assessment.id,
            question_id = %saved.question_id,
            "answer saved"
        );

        Ok(saved)
    }

    pub async fn list_answers(
        &self,
        user_id: Uuid,
        assessment_id: Uuid,
    ) -> Result<Vec<AssessmentAnswer>> {
        let assessment = self.get_owned(user_id, assessment_id).await?;
        self.repo.list_answers(assessment.id).await
    }

    /// Completes an assessment. Completing twice is a state conflict.
    pub async fn complete(&self, user_id: Uuid, assessment_id: Uuid) -> Result<Assessment> {
        let assessment = self.get_owned(user_id, assessment_id).await?;

        match self.repo.mark_completed(assessment.id, Utc::now()).await? {
            Some(completed) => {
                get_metrics().record_assessment_completed(&completed.funnel_slug);
                tracing::info!(assessment_id = %completed.id, "assessment completed");
                Ok(completed)
            }
            None => Err(AppError::StateConflict(
                "Assessment is already completed".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssessmentStatus;
    use crate::repositories::InMemoryAssessmentRepository;

    fn service() -> AssessmentService {
        AssessmentService::new(Arc::new(InMemoryAssessmentRepository::new()))
    }

    fn answer(value: i32) -> SaveAnswerRequest {
        SaveAnswerRequest {
            step_id: "s1".to_string(),
            question_id: "q1".to_string(),
            answer_value: value,
        }
    }

    async fn started(service: &AssessmentService, user: Uuid) -> Assessment {
        service
            .create_assessment(
                user,
                CreateAssessmentRequest {
                    funnel_slug: "stress-check".to_string(),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_list() {
        let service = service();
        let user = Uuid::new_v4();
        let assessment = started(&service, user).await;

        service.save_answer(user, assessment.id, answer(2)).await.unwrap();
        let answers = service.list_answers(user, assessment.id).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].answer_value, 2);
    }

    #[tokio::test]
    async fn test_other_user_is_forbidden() {
        let service = service();
        let assessment = started(&service, Uuid::new_v4()).await;

        let result = service.save_answer(Uuid::new_v4(), assessment.id, answer(2)).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_unknown_assessment_is_not_found() {
        let service = service();
        let result = service.save_answer(Uuid::new_v4(), Uuid::new_v4(), answer(2)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_answer_is_rejected() {
        let service = service();
        let user = Uuid::new_v4();
        let assessment = started(&service, user).await;

        let mut request = answer(2);
        request.step_id = String::new();
        let result = service.save_answer(user, assessment.id, request).await;
        assert!(matches!(result, Err(AppError::ValidationDetails(_))));
    }

    #[tokio::test]
    async fn test_blank_funnel_slug_is_rejected() {
        let service = service();
        let result = service
            .create_assessment(
                Uuid::new_v4(),
                CreateAssessmentRequest {
                    funnel_slug: "   ".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::ValidationDetails(_))));
    }

    #[tokio::test]
    async fn test_funnel_slug_is_trimmed() {
        let service = service();
        let created = service
            .create_assessment(
                Uuid::new_v4(),
                CreateAssessmentRequest {
                    funnel_slug: "  stress-check ".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(created.funnel_slug, "stress-check");
    }

    #[tokio::test]
    async fn test_completed_assessment_rejects_answers() {
        let service = service();
        let user = Uuid::new_v4();
        let assessment = started(&service, user).await;

        let completed = service.complete(user, assessment.id).await.unwrap();
        assert_eq!(completed.status, AssessmentStatus::Completed);

        let result = service.save_answer(user, assessment.id, answer(3)).await;
        assert!(matches!(result, Err(AppError::StateConflict(_))));
        let again = service.complete(user, assessment.id).await;
        assert!(matches!(again, Err(AppError::StateConflict(_))));
    }
}

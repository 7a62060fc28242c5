use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to save one funnel answer.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SaveAnswerRequest {
    #[validate(length(min = 1, max = 128, message = "stepId must be 1-128 characters"))]
    pub step_id: String,
    #[validate(length(min = 1, max = 128, message = "questionId must be 1-128 characters"))]
    pub question_id: String,
    #[validate(range(min = 0, max = 1000, message = "answerValue must be between 0 and 1000"))]
    pub answer_value: i32,
}

/// Request to start an assessment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssessmentRequest {
    #[validate(length(min = 1, max = 64, message = "funnelSlug must be 1-64 characters"))]
    pub funnel_slug: String,
}

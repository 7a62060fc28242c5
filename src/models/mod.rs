pub mod assessment;

pub use assessment::{Assessment, AssessmentAnswer, AssessmentStatus};

use kmeval_records::Condition;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
    #[error("No {condition} data for task {task}. {measure} are required from both prototype and baseline conditions.")]
    MissingCondition {
        condition: Condition,
        task: String,
        measure: &'static str,
    },

    #[error("No graded {condition} records for task {task}; grades come from Subject-Task files")]
    MissingGrades { condition: Condition, task: String },

    #[error("Grade '{grade}' for {key} is not numeric")]
    NonNumericGrade { key: String, grade: String },

    #[error("Total time for {key} is zero")]
    ZeroTotalTime { key: String },

    #[error("Sum of times for {condition} records of task {task} is zero")]
    ZeroProductivityTime { condition: Condition, task: String },

    #[error("Maximum score for task {task} must be positive (found {max_score})")]
    InvalidMaximumScore { task: String, max_score: i64 },

    #[error("Baseline time for task {task} equals its optimal time ({optimal}s)")]
    BaselineEqualsOptimal { task: String, optimal: f64 },
}

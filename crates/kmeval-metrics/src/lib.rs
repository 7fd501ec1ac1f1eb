//! # kmeval-metrics
//!
//! Compares the prototype and baseline conditions of a usability study,
//! task by task, over records reconciled by `kmeval-records`.
//!
//! Every metric averages over all subjects of a task/condition pair
//! before comparing the two conditions.

pub mod error;
pub mod filter;
pub mod metrics;

pub use error::MetricsError;
pub use filter::{filter_records, RecordFilter};
pub use metrics::{
    average_failure_rate, average_km_fraction, average_total_time,
    binarized_proportional_task_failure_rate_reduction, evaluate_task,
    km_time_proportional_reduction, productivity, proportional_increase_in_productivity,
    proportional_task_failure_rate_reduction, prototype_time_relative_to_baseline_and_optimal,
    ConditionGroup, TaskEvaluation,
};

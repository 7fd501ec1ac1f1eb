use std::collections::BTreeMap;

use kmeval_records::{Condition, Grade, SessionKey, SubjectTaskRecord, TaskMetadataEntry};
use serde::Serialize;
use tracing::debug;

use crate::error::MetricsError;
use crate::filter::{filter_records, RecordFilter};

/// The records of one task under one condition.
#[derive(Debug, Clone)]
pub struct ConditionGroup<'a> {
    pub task: String,
    pub condition: Condition,
    pub records: Vec<&'a SubjectTaskRecord>,
}

impl<'a> ConditionGroup<'a> {
    pub fn select(
        records: &'a BTreeMap<SessionKey, SubjectTaskRecord>,
        task: &str,
        condition: Condition,
    ) -> Self {
        Self {
            task: task.to_string(),
            condition,
            records: filter_records(records, &RecordFilter::for_task(task, condition)),
        }
    }

    /// Group already-filtered records, naming the group after the first.
    pub fn of(records: &[&'a SubjectTaskRecord]) -> Self {
        let first = records.first();
        Self {
            task: first.map(|r| r.task_id.to_string()).unwrap_or_default(),
            condition: first.map(|r| r.condition).unwrap_or(Condition::Prototype),
            records: records.to_vec(),
        }
    }

    /// Fail unless the group holds at least one record. `measure` names
    /// what the caller needs the records for.
    fn require(self, measure: &'static str) -> Result<Self, MetricsError> {
        if self.records.is_empty() {
            return Err(MetricsError::MissingCondition {
                condition: self.condition,
                task: self.task,
                measure,
            });
        }
        Ok(self)
    }

    /// Mean share of each session's time spent pulling from the KM system.
    pub fn average_km_fraction(&self) -> Result<f64, MetricsError> {
        let fractions = self
            .records
            .iter()
            .map(|r| {
                if r.task_total_time == 0.0 {
                    return Err(MetricsError::ZeroTotalTime {
                        key: r.key().to_string(),
                    });
                }
                Ok(r.km_pull_total_time / r.task_total_time)
            })
            .collect::<Result<Vec<f64>, _>>()?;
        Ok(mean(&fractions))
    }

    pub fn average_total_time(&self) -> f64 {
        let times: Vec<f64> = self.records.iter().map(|r| r.task_total_time).collect();
        mean(&times)
    }

    /// `(max - mean grade) / max` over the graded records, each grade first
    /// passed through `recast`.
    pub fn average_failure_rate(
        &self,
        max_score: i64,
        recast: impl Fn(f64) -> f64,
    ) -> Result<f64, MetricsError> {
        let grades = self.grades()?;
        if grades.is_empty() {
            return Err(self.missing_grades());
        }

        let max = max_score as f64;
        let scores: Vec<f64> = grades.into_iter().map(|(_, g)| recast(g)).collect();
        Ok((max - mean(&scores)) / max)
    }

    /// Points earned per minute spent, over the graded records.
    pub fn productivity(&self) -> Result<f64, MetricsError> {
        let grades = self.grades()?;
        if grades.is_empty() {
            return Err(self.missing_grades());
        }

        let scores: f64 = grades.iter().map(|(_, g)| g).sum();
        let minutes: f64 = grades.iter().map(|(r, _)| r.task_total_time / 60.0).sum();
        if minutes == 0.0 {
            return Err(MetricsError::ZeroProductivityTime {
                condition: self.condition,
                task: self.task.clone(),
            });
        }
        Ok(scores / minutes)
    }

    /// Numeric grades of records that carry an assessment. Records built
    /// only from state transitions have none and are skipped.
    fn grades(&self) -> Result<Vec<(&'a SubjectTaskRecord, f64)>, MetricsError> {
        let mut grades = Vec::new();
        for record in &self.records {
            let Some(assessment) = &record.assessment else {
                continue;
            };
            match &assessment.task_grade {
                Grade::Text(text) => {
                    return Err(MetricsError::NonNumericGrade {
                        key: record.key().to_string(),
                        grade: text.clone(),
                    })
                }
                grade => {
                    if let Some(value) = grade.as_f64() {
                        grades.push((*record, value));
                    }
                }
            }
        }
        Ok(grades)
    }

    fn missing_grades(&self) -> MetricsError {
        MetricsError::MissingGrades {
            condition: self.condition,
            task: self.task.clone(),
        }
    }
}

/// Prototype and baseline groups for `task`, both required to be non-empty.
fn both_conditions<'a>(
    records: &'a BTreeMap<SessionKey, SubjectTaskRecord>,
    task: &str,
    measure: &'static str,
) -> Result<(ConditionGroup<'a>, ConditionGroup<'a>), MetricsError> {
    let prototype = ConditionGroup::select(records, task, Condition::Prototype).require(measure)?;
    let baseline = ConditionGroup::select(records, task, Condition::Baseline).require(measure)?;
    Ok((prototype, baseline))
}

/// `1 - p/b`, pinned to 0 when both are zero and to -1 when the baseline
/// is zero or the prototype more than doubles it.
fn proportional_reduction(prototype: f64, baseline: f64) -> f64 {
    if baseline == 0.0 && prototype == 0.0 {
        0.0
    } else if baseline == 0.0 || prototype > 2.0 * baseline {
        -1.0
    } else {
        1.0 - prototype / baseline
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

// ============================================================
// Time-based metrics
// ============================================================

pub fn average_km_fraction(records: &[&SubjectTaskRecord]) -> Result<f64, MetricsError> {
    ConditionGroup::of(records).average_km_fraction()
}

pub fn average_total_time(records: &[&SubjectTaskRecord]) -> f64 {
    ConditionGroup::of(records).average_total_time()
}

/// Reduction in the share of time spent on KM pull activity, prototype
/// relative to baseline.
pub fn km_time_proportional_reduction(
    records: &BTreeMap<SessionKey, SubjectTaskRecord>,
    task: &str,
) -> Result<f64, MetricsError> {
    let (prototype, baseline) = both_conditions(records, task, "Times")?;
    Ok(proportional_reduction(
        prototype.average_km_fraction()?,
        baseline.average_km_fraction()?,
    ))
}

/// Where the prototype's mean time falls between baseline (0) and the
/// optimal time (1). Slower than baseline scales toward -1 at twice the
/// baseline time.
pub fn prototype_time_relative_to_baseline_and_optimal(
    records: &BTreeMap<SessionKey, SubjectTaskRecord>,
    task: &str,
    optimal_time: f64,
) -> Result<f64, MetricsError> {
    let (prototype, baseline) = both_conditions(records, task, "Times")?;
    let p = prototype.average_total_time();
    let b = baseline.average_total_time();

    if p <= b {
        if b == optimal_time {
            return Err(MetricsError::BaselineEqualsOptimal {
                task: task.to_string(),
                optimal: optimal_time,
            });
        }
        Ok(1.0 - (p - optimal_time) / (b - optimal_time))
    } else {
        Ok((1.0 - p / b).max(-1.0))
    }
}

// ============================================================
// Score-based metrics
// ============================================================

pub fn average_failure_rate(
    records: &[&SubjectTaskRecord],
    max_score: i64,
) -> Result<f64, MetricsError> {
    ConditionGroup::of(records).average_failure_rate(max_score, |g| g)
}

fn failure_rate_reduction(
    records: &BTreeMap<SessionKey, SubjectTaskRecord>,
    task: &str,
    max_score: i64,
    recast: impl Fn(f64) -> f64 + Copy,
) -> Result<f64, MetricsError> {
    if max_score <= 0 {
        return Err(MetricsError::InvalidMaximumScore {
            task: task.to_string(),
            max_score,
        });
    }
    let (prototype, baseline) = both_conditions(records, task, "Grades")?;
    Ok(proportional_reduction(
        prototype.average_failure_rate(max_score, recast)?,
        baseline.average_failure_rate(max_score, recast)?,
    ))
}

/// Reduction in mean failure rate, prototype relative to baseline.
pub fn proportional_task_failure_rate_reduction(
    records: &BTreeMap<SessionKey, SubjectTaskRecord>,
    task: &str,
    max_score: i64,
) -> Result<f64, MetricsError> {
    failure_rate_reduction(records, task, max_score, |g| g)
}

/// As [`proportional_task_failure_rate_reduction`], with every grade first
/// recast to `max_score` when it reaches `passing_score` and 0 otherwise.
pub fn binarized_proportional_task_failure_rate_reduction(
    records: &BTreeMap<SessionKey, SubjectTaskRecord>,
    task: &str,
    max_score: i64,
    passing_score: f64,
) -> Result<f64, MetricsError> {
    let max = max_score as f64;
    failure_rate_reduction(records, task, max_score, move |g| {
        if g >= passing_score {
            max
        } else {
            0.0
        }
    })
}

// ============================================================
// Combined metrics
// ============================================================

/// Points per minute over graded records. Scores are not normalised.
pub fn productivity(records: &[&SubjectTaskRecord]) -> Result<f64, MetricsError> {
    ConditionGroup::of(records).productivity()
}

/// `(p - b) / b` over the two conditions' productivity; infinite when the
/// baseline earned nothing.
pub fn proportional_increase_in_productivity(
    records: &BTreeMap<SessionKey, SubjectTaskRecord>,
    task: &str,
) -> Result<f64, MetricsError> {
    let (prototype, baseline) = both_conditions(records, task, "Grades")?;
    let p = prototype.productivity()?;
    let b = baseline.productivity()?;

    if b == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok((p - b) / b)
}

/// Every metric for one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvaluation {
    pub task: String,
    pub km_time_proportional_reduction: f64,
    pub prototype_time_relative_to_baseline_and_optimal: f64,
    pub proportional_task_failure_rate_reduction: f64,
    pub proportional_increase_in_productivity: f64,
    /// Only computed when the task has a passing score.
    pub binarized_proportional_task_failure_rate: Option<f64>,
}

pub fn evaluate_task(
    records: &BTreeMap<SessionKey, SubjectTaskRecord>,
    task: &str,
    metadata: &TaskMetadataEntry,
) -> Result<TaskEvaluation, MetricsError> {
    let evaluation = TaskEvaluation {
        task: task.to_string(),
        km_time_proportional_reduction: km_time_proportional_reduction(records, task)?,
        prototype_time_relative_to_baseline_and_optimal:
            prototype_time_relative_to_baseline_and_optimal(
                records,
                task,
                metadata.task_optimal_time_in_seconds,
            )?,
        proportional_task_failure_rate_reduction: proportional_task_failure_rate_reduction(
            records,
            task,
            metadata.task_maximum_score,
        )?,
        proportional_increase_in_productivity: proportional_increase_in_productivity(
            records, task,
        )?,
        binarized_proportional_task_failure_rate: metadata
            .task_passing_score
            .map(|passing| {
                binarized_proportional_task_failure_rate_reduction(
                    records,
                    task,
                    metadata.task_maximum_score,
                    passing,
                )
            })
            .transpose()?,
    };
    debug!(task, ?evaluation, "Evaluated task");
    Ok(evaluation)
}

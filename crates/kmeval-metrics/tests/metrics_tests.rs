use std::collections::BTreeMap;
use std::fs;

use kmeval_metrics::{
    binarized_proportional_task_failure_rate_reduction, evaluate_task, filter_records,
    km_time_proportional_reduction, productivity, proportional_increase_in_productivity,
    proportional_task_failure_rate_reduction, prototype_time_relative_to_baseline_and_optimal,
    MetricsError, RecordFilter,
};
use kmeval_records::{Condition, RecordStore, SessionKey, SubjectTaskRecord};
use tempfile::TempDir;

fn line(subject: &str, condition: &str, task: &str, total: f64, pull: f64, grade: &str) -> String {
    format!(
        r#"{{"subject_id":"{subject}","condition":"{condition}","task_id":"{task}","task_start_time":"2024-01-01T10:00:00Z","task_total_time":{total},"km_pull_total_time":{pull},"km_push_total_time":0,"task_grade":{grade},"corpus_knowledge_nugget_count":0,"expert_captured_knowledge_nugget_count":0,"nugget_content":[],"task_timeout":false}}"#
    )
}

fn load(lines: &[String]) -> BTreeMap<SessionKey, SubjectTaskRecord> {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("subject_task.jsonl"), lines.join("\n")).unwrap();
    RecordStore::with_dir(dir.path()).reconcile().unwrap().records
}

/// Two subjects per condition on Task1, prototype only on Task2.
fn study() -> BTreeMap<SessionKey, SubjectTaskRecord> {
    load(&[
        line("U1", "prototype", "Task1", 100.0, 20.0, "4"),
        line("U2", "prototype", "Task1", 80.0, 10.0, "5"),
        line("U3", "baseline", "Task1", 200.0, 80.0, "3"),
        line("U4", "baseline", "Task1", 160.0, 40.0, "2"),
        line("U1", "prototype", "Task2", 50.0, 0.0, "1"),
    ])
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// ============================================================
// Filtering
// ============================================================

#[test]
fn test_filter_by_condition_and_task() {
    let records = study();
    let filter = RecordFilter::for_task("Task1", Condition::Baseline);
    let matched = filter_records(&records, &filter);
    assert_eq!(matched.len(), 2);
    assert!(matched.iter().all(|r| r.condition == Condition::Baseline));
}

#[test]
fn test_filter_by_subject() {
    let records = study();
    let filter = RecordFilter {
        subject: Some("U1".to_string()),
        ..RecordFilter::default()
    };
    assert_eq!(filter_records(&records, &filter).len(), 2);
    assert_eq!(filter_records(&records, &RecordFilter::default()).len(), 5);
}

// ============================================================
// Time-based metrics
// ============================================================

#[test]
fn test_km_time_proportional_reduction() {
    let value = km_time_proportional_reduction(&study(), "Task1").unwrap();
    assert!(close(value, 0.5), "got {value}");
}

#[test]
fn test_km_time_needs_both_conditions() {
    let err = km_time_proportional_reduction(&study(), "Task2").unwrap_err();
    assert_eq!(
        err,
        MetricsError::MissingCondition {
            condition: Condition::Baseline,
            task: "Task2".to_string(),
            measure: "Times",
        }
    );
}

#[test]
fn test_km_time_zero_in_both_conditions() {
    let records = load(&[
        line("U1", "prototype", "T", 60.0, 0.0, "1"),
        line("U2", "baseline", "T", 90.0, 0.0, "1"),
    ]);
    assert_eq!(km_time_proportional_reduction(&records, "T").unwrap(), 0.0);
}

#[test]
fn test_km_time_doubled_by_prototype() {
    let records = load(&[
        line("U1", "prototype", "T", 100.0, 50.0, "1"),
        line("U2", "baseline", "T", 100.0, 20.0, "1"),
    ]);
    assert_eq!(km_time_proportional_reduction(&records, "T").unwrap(), -1.0);
}

#[test]
fn test_km_time_zero_total_time() {
    let records = load(&[
        line("U1", "prototype", "T", 0.0, 0.0, "1"),
        line("U2", "baseline", "T", 100.0, 20.0, "1"),
    ]);
    assert!(matches!(
        km_time_proportional_reduction(&records, "T").unwrap_err(),
        MetricsError::ZeroTotalTime { .. }
    ));
}

#[test]
fn test_time_relative_to_baseline_and_optimal() {
    let value = prototype_time_relative_to_baseline_and_optimal(&study(), "Task1", 60.0).unwrap();
    assert!(close(value, 0.75), "got {value}");
}

#[test]
fn test_slower_prototype_bottoms_out_at_minus_one() {
    let records = load(&[
        line("U1", "prototype", "T", 150.0, 0.0, "1"),
        line("U2", "baseline", "T", 100.0, 0.0, "1"),
    ]);
    let value = prototype_time_relative_to_baseline_and_optimal(&records, "T", 30.0).unwrap();
    assert!(close(value, -0.5), "got {value}");

    let records = load(&[
        line("U1", "prototype", "T", 500.0, 0.0, "1"),
        line("U2", "baseline", "T", 100.0, 0.0, "1"),
    ]);
    let value = prototype_time_relative_to_baseline_and_optimal(&records, "T", 30.0).unwrap();
    assert_eq!(value, -1.0);
}

// ============================================================
// Score-based metrics
// ============================================================

#[test]
fn test_failure_rate_reduction() {
    let value = proportional_task_failure_rate_reduction(&study(), "Task1", 5).unwrap();
    assert!(close(value, 0.8), "got {value}");
}

#[test]
fn test_binarized_failure_rate_reduction() {
    let value = binarized_proportional_task_failure_rate_reduction(&study(), "Task1", 5, 4.0).unwrap();
    assert_eq!(value, 1.0);
}

#[test]
fn test_text_grades_are_rejected() {
    let records = load(&[
        line("U1", "prototype", "T", 100.0, 0.0, r#""A""#),
        line("U2", "baseline", "T", 100.0, 0.0, "3"),
    ]);
    assert!(matches!(
        proportional_task_failure_rate_reduction(&records, "T", 5).unwrap_err(),
        MetricsError::NonNumericGrade { grade, .. } if grade == "A"
    ));
}

#[test]
fn test_records_without_grades() {
    let dir = TempDir::new().unwrap();
    let events = ["prototype", "baseline"]
        .iter()
        .flat_map(|condition| {
            [
                ("10:00:00", "task_initialized"),
                ("10:01:00", "task_conclusion"),
            ]
            .map(|(time, state)| {
                format!(
                    r#"{{"subject_id":"U1","condition":"{condition}","task_id":"T","utc_timestamp":"2024-01-01T{time}Z","state_id":"{state}"}}"#
                )
            })
        })
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(dir.path().join("events.jsonl"), events).unwrap();
    let records = RecordStore::with_dir(dir.path()).reconcile().unwrap().records;

    assert!(matches!(
        proportional_task_failure_rate_reduction(&records, "T", 5).unwrap_err(),
        MetricsError::MissingGrades { condition: Condition::Prototype, .. }
    ));
    assert!(matches!(
        proportional_increase_in_productivity(&records, "T").unwrap_err(),
        MetricsError::MissingGrades { .. }
    ));
}

#[test]
fn test_maximum_score_must_be_positive() {
    assert!(matches!(
        proportional_task_failure_rate_reduction(&study(), "Task1", 0).unwrap_err(),
        MetricsError::InvalidMaximumScore { max_score: 0, .. }
    ));
}

// ============================================================
// Combined metrics
// ============================================================

#[test]
fn test_productivity() {
    let records = study();
    let prototype = filter_records(&records, &RecordFilter::for_task("Task1", Condition::Prototype));
    assert!(close(productivity(&prototype).unwrap(), 3.0));
}

#[test]
fn test_proportional_increase_in_productivity() {
    let value = proportional_increase_in_productivity(&study(), "Task1").unwrap();
    assert!(close(value, 2.6), "got {value}");
}

#[test]
fn test_zero_baseline_productivity_is_infinite() {
    let records = load(&[
        line("U1", "prototype", "T", 60.0, 0.0, "3"),
        line("U2", "baseline", "T", 60.0, 0.0, "0"),
    ]);
    assert_eq!(
        proportional_increase_in_productivity(&records, "T").unwrap(),
        f64::INFINITY
    );
}

#[test]
fn test_evaluate_task() {
    let metadata = kmeval_records::TaskMetadataEntry {
        task_optimal_time_in_seconds: 60.0,
        task_maximum_score: 5,
        task_passing_score: None,
    };
    let evaluation = evaluate_task(&study(), "Task1", &metadata).unwrap();

    assert_eq!(evaluation.task, "Task1");
    assert!(close(evaluation.prototype_time_relative_to_baseline_and_optimal, 0.75));
    assert!(evaluation.binarized_proportional_task_failure_rate.is_none());

    let with_passing = kmeval_records::TaskMetadataEntry {
        task_passing_score: Some(4.0),
        ..metadata
    };
    let evaluation = evaluate_task(&study(), "Task1", &with_passing).unwrap();
    assert_eq!(evaluation.binarized_proportional_task_failure_rate, Some(1.0));
}

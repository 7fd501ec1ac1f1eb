use std::collections::BTreeMap;

use kmeval_records::{Condition, SessionKey, SubjectTaskRecord};

/// Which records a metric considers. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub subject: Option<String>,
    pub condition: Option<Condition>,
    pub task: Option<String>,
}

impl RecordFilter {
    pub fn for_task(task: &str, condition: Condition) -> Self {
        Self {
            subject: None,
            condition: Some(condition),
            task: Some(task.to_string()),
        }
    }

    pub fn matches(&self, record: &SubjectTaskRecord) -> bool {
        if let Some(ref subject) = self.subject {
            if record.subject_id.to_string() != *subject {
                return false;
            }
        }

        if let Some(condition) = self.condition {
            if record.condition != condition {
                return false;
            }
        }

        if let Some(ref task) = self.task {
            if record.task_id.to_string() != *task {
                return false;
            }
        }

        true
    }
}

/// Records matching `filter`, in session-key order.
pub fn filter_records<'a>(
    records: &'a BTreeMap<SessionKey, SubjectTaskRecord>,
    filter: &RecordFilter,
) -> Vec<&'a SubjectTaskRecord> {
    records.values().filter(|r| filter.matches(r)).collect()
}

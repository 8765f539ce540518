use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Submitted,
    /// Submitted earlier and since handed back to the student.
    Returned,
    Missing,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Returned => "returned",
            SubmissionStatus::Missing => "missing",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Ok(SubmissionStatus::Submitted),
            "returned" => Ok(SubmissionStatus::Returned),
            "missing" => Ok(SubmissionStatus::Missing),
            other => Err(TrackerError::UnknownStatus(other.to_string())),
        }
    }
}

/// One evaluation of a student's notebook for one subject in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub student_id: String,
    pub subject_id: String,
    pub cycle_id: String,
    pub status: SubmissionStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub cycle_start_date: DateTime<Utc>,
}

impl SubmissionRecord {
    /// Late only when both the submission time and the due date are known.
    pub fn is_late(&self) -> bool {
        match (self.submitted_at, self.due_date) {
            (Some(submitted_at), Some(due_date)) => submitted_at > due_date,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StudentSubmissionHistory {
    pub student_id: String,
    pub student_name: String,
    pub scholar_number: String,
    pub submissions: Vec<SubmissionRecord>,
    /// Misses from completed cycles before the current window, as counted by the caller.
    pub previous_missing_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionStats {
    pub total: usize,
    pub submitted: usize,
    pub returned: usize,
    pub missing: usize,
    /// Percentage of records that are not missing, 0-100.
    pub submission_rate: f64,
    pub late: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsecutivePattern {
    pub has_pattern: bool,
    pub reason: String,
    pub max_consecutive_missing: usize,
    pub trailing_missing_streak: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskScore {
    pub probability: u32,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaulterPrediction {
    pub student_id: String,
    pub student_name: String,
    pub scholar_number: String,
    /// Risk on a 0-100 point scale.
    pub default_probability: u32,
    pub missing_count: usize,
    pub history_pattern: String,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SubjectSummary {
    pub subject_id: String,
    pub total: usize,
    pub missing: usize,
    pub submission_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub student_id: String,
    pub scholar_number: String,
    pub parent_phone: String,
    pub default_probability: u32,
    pub body: String,
}

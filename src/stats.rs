use std::collections::BTreeMap;

use crate::models::{SubjectSummary, SubmissionRecord, SubmissionStats, SubmissionStatus};

pub fn calculate_stats(submissions: &[SubmissionRecord]) -> SubmissionStats {
    let mut stats = SubmissionStats {
        total: submissions.len(),
        ..SubmissionStats::default()
    };

    for submission in submissions {
        match submission.status {
            SubmissionStatus::Submitted => stats.submitted += 1,
            SubmissionStatus::Returned => stats.returned += 1,
            SubmissionStatus::Missing => stats.missing += 1,
        }
        if submission.is_late() {
            stats.late += 1;
        }
    }

    stats.submission_rate = submission_rate(stats.total - stats.missing, stats.total);
    stats
}

/// Percentage of `handed_in` over `total`, 0 when there is nothing to rate.
pub fn submission_rate(handed_in: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (handed_in as f64 * 100.0) / total as f64
    }
}

pub fn summarize_by_subject(submissions: &[SubmissionRecord]) -> Vec<SubjectSummary> {
    let mut map: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

    for submission in submissions {
        let entry = map.entry(submission.subject_id.as_str()).or_insert((0, 0));
        entry.0 += 1;
        if submission.status == SubmissionStatus::Missing {
            entry.1 += 1;
        }
    }

    let mut summaries: Vec<SubjectSummary> = map
        .into_iter()
        .map(|(subject_id, (total, missing))| SubjectSummary {
            subject_id: subject_id.to_string(),
            total,
            missing,
            submission_rate: submission_rate(total - missing, total),
        })
        .collect();

    summaries.sort_by(|a, b| b.missing.cmp(&a.missing));
    summaries
}

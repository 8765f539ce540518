use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{StudentSubmissionHistory, SubmissionRecord, SubmissionStatus};
use crate::risk;
use crate::stats::summarize_by_subject;

pub fn build_report(
    scope: Option<&str>,
    cutoff: DateTime<Utc>,
    histories: &[StudentSubmissionHistory],
    threshold: usize,
) -> String {
    let predictions = risk::predict_defaulters(histories, threshold);
    let submissions: Vec<SubmissionRecord> = histories
        .iter()
        .flat_map(|history| history.submissions.iter().cloned())
        .collect();
    let summaries = summarize_by_subject(&submissions);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all classes");

    let _ = writeln!(output, "# Notebook Defaulter Report");
    let _ = writeln!(
        output,
        "Generated for {} (cycles since {})",
        scope_label,
        cutoff.date_naive()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Submission Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No submissions recorded for this window.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} notebooks, {} missing ({:.1}% submitted)",
                summary.subject_id, summary.total, summary.missing, summary.submission_rate
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Predicted Defaulters");

    if predictions.is_empty() {
        let _ = writeln!(output, "No students at risk in this window.");
    } else {
        for prediction in predictions.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}) risk {}% with {} missing: {}",
                prediction.student_name,
                prediction.scholar_number,
                prediction.default_probability,
                prediction.missing_count,
                prediction.history_pattern
            );
            for reason in &prediction.reasoning {
                let _ = writeln!(output, "  - {reason}");
            }
        }
    }

    let mut recent_missing: Vec<(&StudentSubmissionHistory, &SubmissionRecord)> = histories
        .iter()
        .flat_map(|history| {
            history
                .submissions
                .iter()
                .filter(|submission| submission.status == SubmissionStatus::Missing)
                .map(move |submission| (history, submission))
        })
        .collect();
    recent_missing.sort_by(|a, b| b.1.cycle_start_date.cmp(&a.1.cycle_start_date));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Missing Notebooks");

    if recent_missing.is_empty() {
        let _ = writeln!(output, "No missing notebooks in this window.");
    } else {
        for (history, submission) in recent_missing.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}) missed {} in cycle {} starting {}",
                history.student_name,
                history.scholar_number,
                submission.subject_id,
                submission.cycle_id,
                submission.cycle_start_date.date_naive()
            );
        }
    }

    output
}

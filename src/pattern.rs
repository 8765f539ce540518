use crate::models::{ConsecutivePattern, SubmissionRecord, SubmissionStatus};

pub const CONSECUTIVE_PATTERN_MIN: usize = 3;
pub const TRAILING_STREAK_MIN: usize = 2;

/// Scans submissions oldest cycle first for runs of missing notebooks.
pub fn detect_consecutive_pattern(submissions: &[SubmissionRecord]) -> ConsecutivePattern {
    let mut ordered: Vec<&SubmissionRecord> = submissions.iter().collect();
    ordered.sort_by_key(|submission| submission.cycle_start_date);

    let mut streak = 0usize;
    let mut max_streak = 0usize;

    for submission in ordered {
        if submission.status == SubmissionStatus::Missing {
            streak += 1;
            max_streak = max_streak.max(streak);
        } else {
            streak = 0;
        }
    }

    let reason = if max_streak >= CONSECUTIVE_PATTERN_MIN {
        format!("Pattern of {max_streak} consecutive missing submissions")
    } else if streak >= TRAILING_STREAK_MIN {
        format!("Currently on a streak of {streak} missing submissions")
    } else {
        String::new()
    };

    ConsecutivePattern {
        has_pattern: !reason.is_empty(),
        reason,
        max_consecutive_missing: max_streak,
        trailing_missing_streak: streak,
    }
}

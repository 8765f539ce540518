use anyhow::Context;
use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::models::{
    ConsecutivePattern, DefaulterPrediction, RiskScore, StudentSubmissionHistory, SubmissionStats,
};
use crate::pattern::detect_consecutive_pattern;
use crate::stats::calculate_stats;

pub const DEFAULT_THRESHOLD: usize = 2;
pub const MAX_PROBABILITY: u32 = 100;

const POINTS_PER_MISSING: u32 = 10;
const MISSING_CAP: u32 = 30;
const POINTS_PER_PREVIOUS_MISS: u32 = 10;
const PREVIOUS_MISS_CAP: u32 = 30;
const LOW_RATE_CUTOFF: f64 = 70.0;
const LOW_RATE_WEIGHT: f64 = 0.3;
const LOW_RATE_CAP: u32 = 30;
const PATTERN_POINTS: u32 = 15;
const POINTS_PER_LATE: u32 = 5;
const LATE_CAP: u32 = 15;

/// Scores every history and returns the students at risk, highest risk first.
///
/// A student is left out unless they have at least one missing notebook and
/// a non-zero score. Equal scores keep their input order.
pub fn predict_defaulters(
    histories: &[StudentSubmissionHistory],
    threshold: usize,
) -> Vec<DefaulterPrediction> {
    let mut predictions = Vec::new();

    for history in histories {
        if history.submissions.is_empty() {
            tracing::debug!(student_id = %history.student_id, "skipping student without submissions");
            continue;
        }

        let stats = calculate_stats(&history.submissions);
        let pattern = detect_consecutive_pattern(&history.submissions);
        let risk = score_default_risk(&stats, &pattern, history.previous_missing_count, threshold);
        tracing::debug!(
            student_id = %history.student_id,
            submitted = stats.submitted,
            returned = stats.returned,
            missing = stats.missing,
            late = stats.late,
            max_streak = pattern.max_consecutive_missing,
            trailing_streak = pattern.trailing_missing_streak,
            probability = risk.probability,
            "student scored"
        );

        if risk.probability == 0 || stats.missing == 0 {
            continue;
        }

        predictions.push(DefaulterPrediction {
            student_id: history.student_id.clone(),
            student_name: history.student_name.clone(),
            scholar_number: history.scholar_number.clone(),
            default_probability: risk.probability,
            missing_count: stats.missing,
            history_pattern: history_pattern_label(
                &stats,
                pattern.has_pattern,
                history.previous_missing_count,
            ),
            reasoning: risk.reasoning,
        });
    }

    predictions.sort_by(|a, b| b.default_probability.cmp(&a.default_probability));
    tracing::info!(
        students = histories.len(),
        defaulters = predictions.len(),
        threshold,
        "defaulter prediction complete"
    );
    predictions
}

/// Additive 0-100 risk score; every factor is capped on its own and the
/// total is clamped to [`MAX_PROBABILITY`].
pub fn score_default_risk(
    stats: &SubmissionStats,
    pattern: &ConsecutivePattern,
    previous_missing_count: usize,
    threshold: usize,
) -> RiskScore {
    let mut probability = 0u32;
    let mut reasoning = Vec::new();

    if stats.missing > 0 && stats.missing >= threshold {
        probability += capped_points(stats.missing, POINTS_PER_MISSING, MISSING_CAP);
        reasoning.push(format!("Has {} missing submissions", stats.missing));
    }

    if previous_missing_count > 0 {
        probability += capped_points(previous_missing_count, POINTS_PER_PREVIOUS_MISS, PREVIOUS_MISS_CAP);
        reasoning.push(format!(
            "{previous_missing_count} missing submissions in previous cycles"
        ));
    }

    if stats.total > 0 && stats.submission_rate < LOW_RATE_CUTOFF {
        let points = ((100.0 - stats.submission_rate) * LOW_RATE_WEIGHT).round() as u32;
        probability += points.min(LOW_RATE_CAP);
        reasoning.push(format!("Low submission rate ({:.0}%)", stats.submission_rate));
    }

    if pattern.has_pattern {
        probability += PATTERN_POINTS;
        reasoning.push(pattern.reason.clone());
    }

    if stats.late > 0 {
        probability += capped_points(stats.late, POINTS_PER_LATE, LATE_CAP);
        reasoning.push(format!("Submitted late {} times", stats.late));
    }

    RiskScore {
        probability: probability.min(MAX_PROBABILITY),
        reasoning,
    }
}

fn capped_points(count: usize, per_item: u32, cap: u32) -> u32 {
    u32::try_from(count)
        .unwrap_or(u32::MAX)
        .saturating_mul(per_item)
        .min(cap)
}

/// Short description of a student's submission behaviour; the first matching rule wins.
pub fn history_pattern_label(
    stats: &SubmissionStats,
    has_pattern: bool,
    previous_missing_count: usize,
) -> String {
    let label = if stats.total < 3 {
        "Insufficient data"
    } else if has_pattern && previous_missing_count > 0 {
        "Consistent missing submissions across multiple cycles"
    } else if has_pattern {
        "Recent consecutive missing submissions"
    } else if stats.late as f64 > stats.total as f64 * 0.25 {
        "Frequently submits late"
    } else if stats.submission_rate < 50.0 {
        "Low submission rate overall"
    } else if stats.submission_rate >= 90.0 {
        "Excellent submission record"
    } else if (1..=2).contains(&stats.missing) {
        "Occasional missing submissions"
    } else if stats.missing == 0 {
        "Regular submission pattern"
    } else {
        "Irregular submission pattern"
    };
    label.to_string()
}

/// Start of the current history window: midnight UTC `since_days` ago.
pub fn cutoff_date(since_days: i64) -> anyhow::Result<DateTime<Utc>> {
    let window = Duration::try_days(since_days.max(1))
        .with_context(|| format!("--since-days {since_days} is out of range"))?;
    let day = Utc::now()
        .date_naive()
        .checked_sub_signed(window)
        .with_context(|| format!("--since-days {since_days} reaches before the earliest date"))?;
    Ok(day.and_time(NaiveTime::MIN).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubmissionRecord;
    use crate::models::SubmissionStatus::{self, Missing, Returned, Submitted};
    use chrono::TimeZone;

    fn records(student_id: &str, statuses: &[SubmissionStatus]) -> Vec<SubmissionRecord> {
        let start = Utc.with_ymd_and_hms(2026, 9, 7, 8, 0, 0).unwrap();
        statuses
            .iter()
            .enumerate()
            .map(|(week, status)| SubmissionRecord {
                student_id: student_id.to_string(),
                subject_id: "english".to_string(),
                cycle_id: format!("english-w{}", week + 1),
                status: *status,
                submitted_at: None,
                returned_at: None,
                due_date: None,
                cycle_start_date: start + Duration::weeks(week as i64),
            })
            .collect()
    }

    fn student(id: &str, statuses: &[SubmissionStatus], previous_missing_count: usize) -> StudentSubmissionHistory {
        StudentSubmissionHistory {
            student_id: id.to_string(),
            student_name: format!("Student {id}"),
            scholar_number: format!("S-{id}"),
            submissions: records(id, statuses),
            previous_missing_count,
        }
    }

    fn score_of(statuses: &[SubmissionStatus], previous_missing_count: usize) -> RiskScore {
        let submissions = records("stu", statuses);
        score_default_risk(
            &calculate_stats(&submissions),
            &detect_consecutive_pattern(&submissions),
            previous_missing_count,
            DEFAULT_THRESHOLD,
        )
    }

    #[test]
    fn early_misses_are_scored_and_explained() {
        let predictions = predict_defaulters(
            &[student("b", &[Missing, Missing, Submitted, Submitted, Submitted], 0)],
            DEFAULT_THRESHOLD,
        );
        assert_eq!(predictions.len(), 1);
        let prediction = &predictions[0];
        assert_eq!(prediction.default_probability, 32);
        assert_eq!(prediction.missing_count, 2);
        assert_ne!(prediction.history_pattern, "Insufficient data");
        assert_eq!(prediction.history_pattern, "Occasional missing submissions");
        assert_eq!(
            prediction.reasoning,
            vec![
                "Has 2 missing submissions".to_string(),
                "Low submission rate (60%)".to_string(),
            ]
        );
    }

    #[test]
    fn empty_histories_are_skipped() {
        let predictions = predict_defaulters(&[student("empty", &[], 4)], DEFAULT_THRESHOLD);
        assert!(predictions.is_empty());
    }

    #[test]
    fn students_without_misses_are_skipped() {
        let predictions = predict_defaulters(
            &[student("clean", &[Submitted, Submitted, Returned, Submitted], 0)],
            DEFAULT_THRESHOLD,
        );
        assert!(predictions.is_empty());
    }

    #[test]
    fn single_miss_below_threshold_is_skipped() {
        let predictions = predict_defaulters(
            &[student("once", &[Submitted, Missing, Submitted, Submitted, Submitted], 0)],
            DEFAULT_THRESHOLD,
        );
        assert!(predictions.is_empty());
    }

    #[test]
    fn output_is_sorted_by_probability() {
        let predictions = predict_defaulters(
            &[
                student("b", &[Missing, Missing, Submitted, Submitted, Submitted], 0),
                student("a", &[Missing, Missing, Missing, Missing, Submitted], 2),
            ],
            DEFAULT_THRESHOLD,
        );
        let order: Vec<&str> = predictions.iter().map(|p| p.student_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(predictions[0].default_probability, 89);
        assert_eq!(predictions[1].default_probability, 32);
        assert!(predictions
            .windows(2)
            .all(|pair| pair[0].default_probability >= pair[1].default_probability));
    }

    #[test]
    fn ties_keep_input_order() {
        let statuses = [Missing, Missing, Submitted, Submitted, Submitted];
        let predictions = predict_defaulters(
            &[student("first", &statuses, 0), student("second", &statuses, 0)],
            DEFAULT_THRESHOLD,
        );
        assert_eq!(predictions[0].student_id, "first");
        assert_eq!(predictions[1].student_id, "second");
    }

    #[test]
    fn more_misses_never_lower_the_score() {
        let mut previous = 0;
        for missing in 0..=6 {
            let statuses: Vec<SubmissionStatus> = (0..6)
                .map(|i| if i < missing { Missing } else { Submitted })
                .collect();
            let score = score_of(&statuses, 0).probability;
            assert!(score >= previous, "{missing} misses scored {score} < {previous}");
            previous = score;
        }
    }

    #[test]
    fn score_is_capped_at_one_hundred() {
        let mut submissions = records("heavy", &[Missing; 8]);
        let due = Utc.with_ymd_and_hms(2026, 11, 6, 16, 0, 0).unwrap();
        for week in 0..2 {
            let mut late = records("heavy", &[Submitted]).remove(0);
            late.cycle_start_date = due + Duration::weeks(week);
            late.due_date = Some(due + Duration::weeks(week));
            late.submitted_at = Some(due + Duration::weeks(week) + Duration::days(2));
            submissions.push(late);
        }
        let stats = calculate_stats(&submissions);
        let pattern = detect_consecutive_pattern(&submissions);
        let risk = score_default_risk(&stats, &pattern, 9, DEFAULT_THRESHOLD);
        assert_eq!(risk.probability, MAX_PROBABILITY);
        assert_eq!(risk.reasoning.len(), 5);
        assert_eq!(risk.reasoning[4], "Submitted late 2 times");
    }

    #[test]
    fn previous_cycles_and_pattern_add_reasons() {
        let risk = score_of(&[Submitted, Submitted, Missing, Missing, Missing], 1);
        assert_eq!(
            risk.reasoning,
            vec![
                "Has 3 missing submissions".to_string(),
                "1 missing submissions in previous cycles".to_string(),
                "Low submission rate (40%)".to_string(),
                "Pattern of 3 consecutive missing submissions".to_string(),
            ]
        );
        assert_eq!(risk.probability, 30 + 10 + 18 + 15);
    }

    #[test]
    fn higher_threshold_ignores_small_miss_counts() {
        let submissions = records("stu", &[Missing, Missing, Submitted, Submitted, Submitted]);
        let risk = score_default_risk(
            &calculate_stats(&submissions),
            &detect_consecutive_pattern(&submissions),
            0,
            3,
        );
        assert_eq!(risk.probability, 12);
        assert_eq!(risk.reasoning, vec!["Low submission rate (60%)".to_string()]);
    }

    #[test]
    fn labels_follow_precedence() {
        let stats = |total, missing, late| SubmissionStats {
            total,
            submitted: total - missing,
            returned: 0,
            missing,
            submission_rate: crate::stats::submission_rate(total - missing, total),
            late,
        };

        assert_eq!(history_pattern_label(&stats(2, 2, 0), true, 3), "Insufficient data");
        assert_eq!(
            history_pattern_label(&stats(6, 3, 0), true, 2),
            "Consistent missing submissions across multiple cycles"
        );
        assert_eq!(
            history_pattern_label(&stats(6, 3, 0), true, 0),
            "Recent consecutive missing submissions"
        );
        assert_eq!(history_pattern_label(&stats(8, 1, 3), false, 0), "Frequently submits late");
        assert_eq!(history_pattern_label(&stats(6, 4, 0), false, 0), "Low submission rate overall");
        assert_eq!(history_pattern_label(&stats(10, 1, 0), false, 0), "Excellent submission record");
        assert_eq!(history_pattern_label(&stats(5, 2, 0), false, 0), "Occasional missing submissions");
        assert_eq!(history_pattern_label(&stats(8, 0, 2), false, 0), "Excellent submission record");
        assert_eq!(history_pattern_label(&stats(8, 3, 0), false, 0), "Irregular submission pattern");
    }

    #[test]
    fn cutoff_date_respects_since_days() {
        let cutoff = cutoff_date(14).unwrap();
        let expected = Utc::now().date_naive() - Duration::days(14);
        assert_eq!(cutoff.date_naive(), expected);
        assert_eq!(cutoff.time(), NaiveTime::MIN);
    }

    #[test]
    fn cutoff_date_rejects_huge_windows() {
        assert!(cutoff_date(i64::MAX).is_err());
        assert!(cutoff_date(500_000_000).is_err());
        assert!(cutoff_date(-5).is_ok());
    }
}

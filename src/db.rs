use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{StudentSubmissionHistory, SubmissionRecord, SubmissionStatus};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

struct NewSubmission<'a> {
    student_id: &'a str,
    cycle_id: &'a str,
    status: SubmissionStatus,
    submitted_at: Option<DateTime<Utc>>,
    returned_at: Option<DateTime<Utc>>,
    source_key: String,
}

async fn upsert_student(
    pool: &PgPool,
    full_name: &str,
    scholar_number: &str,
    class_name: &str,
    parent_phone: Option<&str>,
) -> anyhow::Result<String> {
    let id: String = sqlx::query(
        r#"
        INSERT INTO notebook_tracker.students (id, full_name, scholar_number, class_name, parent_phone)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (scholar_number) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            class_name = EXCLUDED.class_name,
            parent_phone = COALESCE(EXCLUDED.parent_phone, notebook_tracker.students.parent_phone)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(full_name)
    .bind(scholar_number)
    .bind(class_name)
    .bind(parent_phone)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(id)
}

async fn upsert_subject(pool: &PgPool, id: &str, name: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notebook_tracker.subjects (id, name)
        VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
        "#,
    )
    .bind(id)
    .bind(name)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_cycle(
    pool: &PgPool,
    id: &str,
    subject_id: &str,
    class_name: &str,
    start_date: DateTime<Utc>,
    due_date: Option<DateTime<Utc>>,
    completed: bool,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notebook_tracker.cycles (id, subject_id, class_name, start_date, due_date, completed)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO UPDATE
        SET start_date = EXCLUDED.start_date,
            due_date = EXCLUDED.due_date,
            completed = EXCLUDED.completed
        "#,
    )
    .bind(id)
    .bind(subject_id)
    .bind(class_name)
    .bind(start_date)
    .bind(due_date)
    .bind(completed)
    .execute(pool)
    .await?;
    Ok(())
}

const UPSERT_SUBMISSION: &str = r#"
    INSERT INTO notebook_tracker.submissions
    (id, student_id, cycle_id, status, submitted_at, returned_at, source_key)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (student_id, cycle_id) DO UPDATE
    SET status = EXCLUDED.status,
        submitted_at = EXCLUDED.submitted_at,
        returned_at = EXCLUDED.returned_at
    WHERE (notebook_tracker.submissions.status,
           notebook_tracker.submissions.submitted_at,
           notebook_tracker.submissions.returned_at)
        IS DISTINCT FROM (EXCLUDED.status, EXCLUDED.submitted_at, EXCLUDED.returned_at)
    RETURNING (xmax = 0) AS inserted
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionWrite {
    Inserted,
    Updated,
    Unchanged,
}

impl SubmissionWrite {
    /// `inserted` is the `xmax = 0` flag from the upsert; no row back means
    /// the stored record already matched.
    fn from_returning(inserted: Option<bool>) -> Self {
        match inserted {
            Some(true) => SubmissionWrite::Inserted,
            Some(false) => SubmissionWrite::Updated,
            None => SubmissionWrite::Unchanged,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl ImportSummary {
    fn record(&mut self, write: SubmissionWrite) {
        match write {
            SubmissionWrite::Inserted => self.inserted += 1,
            SubmissionWrite::Updated => self.updated += 1,
            SubmissionWrite::Unchanged => self.unchanged += 1,
        }
    }
}

async fn upsert_submission(
    pool: &PgPool,
    submission: NewSubmission<'_>,
) -> anyhow::Result<SubmissionWrite> {
    let row = sqlx::query(UPSERT_SUBMISSION)
        .bind(Uuid::new_v4())
        .bind(submission.student_id)
        .bind(submission.cycle_id)
        .bind(submission.status.as_str())
        .bind(submission.submitted_at)
        .bind(submission.returned_at)
        .bind(submission.source_key)
        .fetch_optional(pool)
        .await?;

    Ok(SubmissionWrite::from_returning(
        row.map(|row| row.get::<bool, _>("inserted")),
    ))
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<ImportSummary> {
    let students = vec![
        (
            "Asha Verma",
            "S-1042",
            Some("+91-98100-00001"),
            "SSMMMMSM",
            "SMMMSSMM",
        ),
        ("Rohan Das", "S-1043", Some("+91-98100-00002"), "SSLSSRSS", "SSSRSSSS"),
        ("Meera Iyer", "S-1044", None, "MSSMSSMS", "SLSMLSSM"),
    ];
    let subjects = [("math", "Mathematics"), ("english", "English")];
    let class_name = "7B";
    let weeks = 8i64;
    let first_start = Utc::now() - Duration::weeks(weeks + 1);

    for (subject_id, subject_name) in subjects {
        upsert_subject(pool, subject_id, subject_name).await?;
        for week in 0..weeks {
            let start = first_start + Duration::weeks(week);
            let due = start + Duration::days(4);
            upsert_cycle(
                pool,
                &format!("{subject_id}-7b-w{}", week + 1),
                subject_id,
                class_name,
                start,
                Some(due),
                due < Utc::now(),
            )
            .await?;
        }
    }

    let mut summary = ImportSummary::default();
    for (name, scholar_number, phone, math, english) in students {
        let student_id = upsert_student(pool, name, scholar_number, class_name, phone).await?;

        for ((subject_id, _), codes) in subjects.iter().zip([math, english]) {
            for (week, code) in codes.chars().enumerate() {
                let start = first_start + Duration::weeks(week as i64);
                let (status, submitted_at) = match code {
                    'S' => (SubmissionStatus::Submitted, Some(start + Duration::days(3))),
                    'L' => (SubmissionStatus::Submitted, Some(start + Duration::days(6))),
                    'R' => (SubmissionStatus::Returned, Some(start + Duration::days(2))),
                    'M' => (SubmissionStatus::Missing, None),
                    other => anyhow::bail!("unknown seed status code {other}"),
                };
                let cycle_id = format!("{subject_id}-7b-w{}", week + 1);
                let returned_at = (status == SubmissionStatus::Returned).then(|| start + Duration::days(5));

                let write = upsert_submission(
                    pool,
                    NewSubmission {
                        student_id: &student_id,
                        cycle_id: &cycle_id,
                        status,
                        submitted_at,
                        returned_at,
                        source_key: format!("seed-{scholar_number}-{cycle_id}"),
                    },
                )
                .await?;
                summary.record(write);
            }
        }
    }

    tracing::info!(
        inserted = summary.inserted,
        updated = summary.updated,
        "seed submissions written"
    );
    Ok(summary)
}

fn scope_clause(
    class_name: Option<&str>,
    scholar_number: Option<&str>,
    param: usize,
) -> (String, Option<String>) {
    if let Some(value) = class_name {
        (format!(" AND st.class_name = ${param}"), Some(value.to_string()))
    } else if let Some(value) = scholar_number {
        (format!(" AND st.scholar_number = ${param}"), Some(value.to_string()))
    } else {
        (String::new(), None)
    }
}

/// Loads one history per student in scope. Submissions come from cycles starting
/// on or after `since`; misses in completed cycles before it become
/// `previous_missing_count`.
pub async fn fetch_histories(
    pool: &PgPool,
    since: DateTime<Utc>,
    class_name: Option<&str>,
    scholar_number: Option<&str>,
) -> anyhow::Result<Vec<StudentSubmissionHistory>> {
    let (clause, scope) = scope_clause(class_name, scholar_number, 1);
    let query = format!(
        "SELECT st.id, st.full_name, st.scholar_number \
         FROM notebook_tracker.students st \
         WHERE TRUE{clause} \
         ORDER BY st.full_name"
    );
    let mut rows = sqlx::query(&query);
    if let Some(value) = &scope {
        rows = rows.bind(value);
    }

    let mut histories: Vec<StudentSubmissionHistory> = rows
        .fetch_all(pool)
        .await
        .context("failed to load students")?
        .into_iter()
        .map(|row| StudentSubmissionHistory {
            student_id: row.get("id"),
            student_name: row.get("full_name"),
            scholar_number: row.get("scholar_number"),
            submissions: Vec::new(),
            previous_missing_count: 0,
        })
        .collect();
    let index: HashMap<String, usize> = histories
        .iter()
        .enumerate()
        .map(|(position, history)| (history.student_id.clone(), position))
        .collect();

    let (clause, scope) = scope_clause(class_name, scholar_number, 2);
    let query = format!(
        "SELECT sub.student_id, c.subject_id, sub.cycle_id, sub.status, \
         sub.submitted_at, sub.returned_at, c.due_date, c.start_date \
         FROM notebook_tracker.submissions sub \
         JOIN notebook_tracker.cycles c ON c.id = sub.cycle_id \
         JOIN notebook_tracker.students st ON st.id = sub.student_id \
         WHERE c.start_date >= $1{clause}"
    );
    let mut rows = sqlx::query(&query).bind(since);
    if let Some(value) = &scope {
        rows = rows.bind(value);
    }

    for row in rows.fetch_all(pool).await.context("failed to load submissions")? {
        let student_id: String = row.get("student_id");
        let status: String = row.get("status");
        let record = SubmissionRecord {
            subject_id: row.get("subject_id"),
            cycle_id: row.get("cycle_id"),
            status: status
                .parse()
                .with_context(|| format!("bad submission row for student {student_id}"))?,
            submitted_at: row.get("submitted_at"),
            returned_at: row.get("returned_at"),
            due_date: row.get("due_date"),
            cycle_start_date: row.get("start_date"),
            student_id,
        };
        if let Some(&position) = index.get(&record.student_id) {
            histories[position].submissions.push(record);
        }
    }

    let query = format!(
        "SELECT sub.student_id, COUNT(*) AS missed \
         FROM notebook_tracker.submissions sub \
         JOIN notebook_tracker.cycles c ON c.id = sub.cycle_id \
         JOIN notebook_tracker.students st ON st.id = sub.student_id \
         WHERE c.start_date < $1 AND c.completed AND sub.status = 'missing'{clause} \
         GROUP BY sub.student_id"
    );
    let mut rows = sqlx::query(&query).bind(since);
    if let Some(value) = &scope {
        rows = rows.bind(value);
    }

    for row in rows.fetch_all(pool).await.context("failed to count previous misses")? {
        let student_id: String = row.get("student_id");
        let missed: i64 = row.get("missed");
        if let Some(&position) = index.get(&student_id) {
            histories[position].previous_missing_count = usize::try_from(missed).unwrap_or(0);
        }
    }

    tracing::debug!(students = histories.len(), %since, "histories loaded");
    Ok(histories)
}

pub async fn fetch_parent_contacts(
    pool: &PgPool,
    student_ids: &[String],
) -> anyhow::Result<HashMap<String, String>> {
    let rows = sqlx::query(
        "SELECT id, parent_phone FROM notebook_tracker.students \
         WHERE parent_phone IS NOT NULL AND id = ANY($1)",
    )
    .bind(student_ids)
    .fetch_all(pool)
    .await
    .context("failed to load parent contacts")?;

    let mut contacts = HashMap::new();
    for row in rows {
        let id: String = row.get("id");
        let phone: String = row.get("parent_phone");
        contacts.insert(id, phone);
    }
    Ok(contacts)
}

pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<ImportSummary> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_name: String,
        scholar_number: String,
        class_name: String,
        parent_phone: Option<String>,
        subject_id: String,
        subject_name: String,
        cycle_id: String,
        cycle_start: DateTime<Utc>,
        due_date: Option<DateTime<Utc>>,
        completed: bool,
        status: String,
        submitted_at: Option<DateTime<Utc>>,
        returned_at: Option<DateTime<Utc>>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut summary = ImportSummary::default();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV record {}", line + 1))?;
        let status: SubmissionStatus = row
            .status
            .parse()
            .with_context(|| format!("invalid CSV record {}", line + 1))?;

        let student_id = upsert_student(
            pool,
            &row.student_name,
            &row.scholar_number,
            &row.class_name,
            row.parent_phone.as_deref().filter(|phone| !phone.is_empty()),
        )
        .await?;
        upsert_subject(pool, &row.subject_id, &row.subject_name).await?;
        upsert_cycle(
            pool,
            &row.cycle_id,
            &row.subject_id,
            &row.class_name,
            row.cycle_start,
            row.due_date,
            row.completed,
        )
        .await?;

        let source_key = row
            .source_key
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let write = upsert_submission(
            pool,
            NewSubmission {
                student_id: &student_id,
                cycle_id: &row.cycle_id,
                status,
                submitted_at: row.submitted_at,
                returned_at: row.returned_at,
                source_key,
            },
        )
        .await?;
        match write {
            SubmissionWrite::Updated => tracing::info!(
                scholar_number = %row.scholar_number,
                cycle_id = %row.cycle_id,
                status = %status,
                "submission status updated"
            ),
            SubmissionWrite::Unchanged => tracing::debug!(
                scholar_number = %row.scholar_number,
                cycle_id = %row.cycle_id,
                "submission already recorded"
            ),
            SubmissionWrite::Inserted => {}
        }
        summary.record(write);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_prefers_class_over_scholar() {
        let (clause, value) = scope_clause(Some("7B"), Some("S-1042"), 2);
        assert_eq!(clause, " AND st.class_name = $2");
        assert_eq!(value.as_deref(), Some("7B"));
    }

    #[test]
    fn scope_filters_by_scholar_number() {
        let (clause, value) = scope_clause(None, Some("S-1042"), 1);
        assert_eq!(clause, " AND st.scholar_number = $1");
        assert_eq!(value.as_deref(), Some("S-1042"));
    }

    #[test]
    fn unscoped_query_has_no_clause() {
        assert_eq!(scope_clause(None, None, 1), (String::new(), None));
    }

    #[test]
    fn resubmitted_cycle_updates_existing_row() {
        assert!(UPSERT_SUBMISSION.contains("ON CONFLICT (student_id, cycle_id) DO UPDATE"));
        assert!(UPSERT_SUBMISSION.contains("status = EXCLUDED.status"));
        assert!(UPSERT_SUBMISSION.contains("returned_at = EXCLUDED.returned_at"));
        assert!(UPSERT_SUBMISSION.contains("IS DISTINCT FROM"));
        assert!(!UPSERT_SUBMISSION.contains("DO NOTHING"));
    }

    #[test]
    fn upsert_result_maps_to_write_kind() {
        assert_eq!(SubmissionWrite::from_returning(Some(true)), SubmissionWrite::Inserted);
        assert_eq!(SubmissionWrite::from_returning(Some(false)), SubmissionWrite::Updated);
        assert_eq!(SubmissionWrite::from_returning(None), SubmissionWrite::Unchanged);
    }

    #[test]
    fn summary_counts_inserts_and_updates_separately() {
        let mut first_import = ImportSummary::default();
        for write in [SubmissionWrite::Inserted, SubmissionWrite::Inserted] {
            first_import.record(write);
        }
        assert_eq!(first_import, ImportSummary { inserted: 2, updated: 0, unchanged: 0 });

        // missing -> submitted after a late hand-in, then an identical replay
        let mut second_import = ImportSummary::default();
        for write in [SubmissionWrite::Updated, SubmissionWrite::Unchanged] {
            second_import.record(write);
        }
        assert_eq!(second_import, ImportSummary { inserted: 0, updated: 1, unchanged: 1 });
    }
}

use std::collections::HashMap;
use std::fmt::Write;

use crate::error::TrackerError;
use crate::models::{
    DefaulterPrediction, OutboundMessage, StudentSubmissionHistory, SubmissionStatus,
};

pub const DEFAULT_MIN_PROBABILITY: u32 = 50;

pub const DEFAULT_TEMPLATE: &str = "Dear parent, {{studentName}} ({{scholarNumber}}) has \
{{missingCount}} missing notebook submissions. Pattern: {{historyPattern}}. Risk level: \
{{defaultProbability}}. Please make sure notebooks are handed in by {{dueDate}}.";

const DUE_DATE_FALLBACK: &str = "the next cycle";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    StudentName,
    ScholarNumber,
    MissingCount,
    HistoryPattern,
    DefaultProbability,
    DueDate,
}

impl Placeholder {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "studentName" => Some(Placeholder::StudentName),
            "scholarNumber" => Some(Placeholder::ScholarNumber),
            "missingCount" => Some(Placeholder::MissingCount),
            "historyPattern" => Some(Placeholder::HistoryPattern),
            "defaultProbability" => Some(Placeholder::DefaultProbability),
            "dueDate" => Some(Placeholder::DueDate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// Parent message with `{{placeholder}}` markers resolved at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    segments: Vec<Segment>,
}

impl MessageTemplate {
    pub fn parse(source: &str) -> Result<Self, TrackerError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let offset = source.len() - rest.len() + open;
            let after = &rest[open + 2..];
            let close = after
                .find("}}")
                .ok_or(TrackerError::UnterminatedPlaceholder(offset))?;
            let name = after[..close].trim();
            let placeholder = Placeholder::from_name(name)
                .ok_or_else(|| TrackerError::UnknownPlaceholder(name.to_string()))?;
            segments.push(Segment::Field(placeholder));
            rest = &after[close + 2..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, context: &MessageContext<'_>) -> String {
        let mut body = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => body.push_str(text),
                Segment::Field(placeholder) => {
                    let _ = match placeholder {
                        Placeholder::StudentName => write!(body, "{}", context.prediction.student_name),
                        Placeholder::ScholarNumber => {
                            write!(body, "{}", context.prediction.scholar_number)
                        }
                        Placeholder::MissingCount => write!(body, "{}", context.prediction.missing_count),
                        Placeholder::HistoryPattern => {
                            write!(body, "{}", context.prediction.history_pattern)
                        }
                        Placeholder::DefaultProbability => {
                            write!(body, "{}%", context.prediction.default_probability)
                        }
                        Placeholder::DueDate => write!(body, "{}", context.due_date),
                    };
                }
            }
        }
        body
    }
}

pub struct MessageContext<'a> {
    pub prediction: &'a DefaulterPrediction,
    pub due_date: String,
}

/// Latest due date among the student's missing notebooks, formatted for parents.
pub fn latest_missing_due_date(history: &StudentSubmissionHistory) -> String {
    history
        .submissions
        .iter()
        .filter(|submission| submission.status == SubmissionStatus::Missing)
        .filter_map(|submission| submission.due_date)
        .max()
        .map(|due| due.format("%d %b %Y").to_string())
        .unwrap_or_else(|| DUE_DATE_FALLBACK.to_string())
}

pub fn compose_notifications(
    predictions: &[DefaulterPrediction],
    histories: &[StudentSubmissionHistory],
    parent_contacts: &HashMap<String, String>,
    min_probability: u32,
    template: &MessageTemplate,
) -> Vec<OutboundMessage> {
    let histories_by_id: HashMap<&str, &StudentSubmissionHistory> = histories
        .iter()
        .map(|history| (history.student_id.as_str(), history))
        .collect();

    let mut messages = Vec::new();
    for prediction in predictions {
        if prediction.default_probability < min_probability {
            continue;
        }

        let Some(parent_phone) = parent_contacts.get(&prediction.student_id) else {
            tracing::warn!(
                student_id = %prediction.student_id,
                scholar_number = %prediction.scholar_number,
                "no parent contact on file, notification skipped"
            );
            continue;
        };

        let due_date = histories_by_id
            .get(prediction.student_id.as_str())
            .map(|history| latest_missing_due_date(history))
            .unwrap_or_else(|| DUE_DATE_FALLBACK.to_string());

        messages.push(OutboundMessage {
            student_id: prediction.student_id.clone(),
            scholar_number: prediction.scholar_number.clone(),
            parent_phone: parent_phone.clone(),
            default_probability: prediction.default_probability,
            body: template.render(&MessageContext { prediction, due_date }),
        });
    }

    tracing::info!(
        candidates = predictions.len(),
        composed = messages.len(),
        min_probability,
        "parent notifications composed"
    );
    messages
}

pub fn write_outbox(path: &std::path::Path, messages: &[OutboundMessage]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for message in messages {
        writer.serialize(message)?;
    }
    writer.flush()?;
    Ok(())
}

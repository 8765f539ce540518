use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("unknown submission status `{0}` (expected submitted, returned or missing)")]
    UnknownStatus(String),
    #[error("unknown template placeholder `{{{{{0}}}}}`")]
    UnknownPlaceholder(String),
    #[error("unterminated placeholder starting at byte {0}")]
    UnterminatedPlaceholder(usize),
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

use anyhow::Context;

use crate::error::TrackerError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to the school's Postgres instance")?;
        let max_connections = parse_max_connections(std::env::var("DATABASE_MAX_CONNECTIONS").ok())?;

        Ok(Self {
            database_url,
            max_connections,
        })
    }
}

fn parse_max_connections(raw: Option<String>) -> Result<u32, TrackerError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_MAX_CONNECTIONS);
    };

    match raw.trim().parse::<u32>() {
        Ok(0) => Err(TrackerError::InvalidSetting {
            name: "DATABASE_MAX_CONNECTIONS",
            reason: "must be at least 1".to_string(),
        }),
        Ok(value) => Ok(value),
        Err(err) => Err(TrackerError::InvalidSetting {
            name: "DATABASE_MAX_CONNECTIONS",
            reason: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_connections_defaults_when_unset() {
        assert_eq!(parse_max_connections(None), Ok(DEFAULT_MAX_CONNECTIONS));
    }

    #[test]
    fn max_connections_parses_value() {
        assert_eq!(parse_max_connections(Some(" 12 ".to_string())), Ok(12));
    }

    #[test]
    fn max_connections_rejects_zero_and_garbage() {
        assert!(matches!(
            parse_max_connections(Some("0".to_string())),
            Err(TrackerError::InvalidSetting { .. })
        ));
        assert!(matches!(
            parse_max_connections(Some("many".to_string())),
            Err(TrackerError::InvalidSetting { .. })
        ));
    }
}

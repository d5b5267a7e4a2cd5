use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal state of one classification attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Assessment {
    Relevant,
    Irrelevant,
    Error,
    LimitReached,
}

impl Assessment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Assessment::Relevant => "Relevant",
            Assessment::Irrelevant => "Irrelevant",
            Assessment::Error => "Error",
            Assessment::LimitReached => "LimitReached",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "Relevant" => Ok(Assessment::Relevant),
            "Irrelevant" => Ok(Assessment::Irrelevant),
            "Error" => Ok(Assessment::Error),
            "LimitReached" => Ok(Assessment::LimitReached),
            _ => Err(anyhow!("unknown assessment '{value}'")),
        }
    }

    /// Relevant/Irrelevant are verdicts worth caching; Error and LimitReached
    /// must stay retryable on the next natural trigger.
    pub fn is_conclusive(&self) -> bool {
        matches!(self, Assessment::Relevant | Assessment::Irrelevant)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRecord {
    pub url: String,
    pub assessment: Assessment,
    pub determined_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_variant() {
        for assessment in [
            Assessment::Relevant,
            Assessment::Irrelevant,
            Assessment::Error,
            Assessment::LimitReached,
        ] {
            assert_eq!(Assessment::parse(assessment.as_str()).unwrap(), assessment);
        }
        assert!(Assessment::parse("Maybe").is_err());
    }

    #[test]
    fn only_verdicts_are_conclusive() {
        assert!(Assessment::Relevant.is_conclusive());
        assert!(Assessment::Irrelevant.is_conclusive());
        assert!(!Assessment::Error.is_conclusive());
        assert!(!Assessment::LimitReached.is_conclusive());
    }
}

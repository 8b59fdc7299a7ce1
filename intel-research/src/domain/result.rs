//! Tagged task result stored in a single persisted slot.

use intel_common::{Error, Result};
use serde::{Deserialize, Serialize};

use super::insight::IndustryInsight;
use super::report::CredibilityReport;

pub const INDUSTRY_INSIGHT: &str = "industry_insight";
pub const CREDIBILITY_REPORT: &str = "credibility_report";

/// Result of a completed investigation task.
///
/// Persisted as a discriminator plus an opaque JSON payload; see
/// [`TaskResult::from_parts`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result_type", content = "payload", rename_all = "snake_case")]
pub enum TaskResult {
    IndustryInsight(IndustryInsight),
    CredibilityReport(CredibilityReport),
}

impl TaskResult {
    pub fn result_type(&self) -> &'static str {
        match self {
            Self::IndustryInsight(_) => INDUSTRY_INSIGHT,
            Self::CredibilityReport(_) => CREDIBILITY_REPORT,
        }
    }

    /// Payload without the discriminator.
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        let value = match self {
            Self::IndustryInsight(insight) => serde_json::to_value(insight)?,
            Self::CredibilityReport(report) => serde_json::to_value(report)?,
        };
        Ok(value)
    }

    /// Decode a payload according to its discriminator.
    pub fn from_parts(result_type: &str, payload: serde_json::Value) -> Result<Self> {
        let result = match result_type {
            INDUSTRY_INSIGHT => Self::IndustryInsight(serde_json::from_value(payload)?),
            CREDIBILITY_REPORT => Self::CredibilityReport(serde_json::from_value(payload)?),
            other => {
                return Err(Error::Validation(format!("未知的结果类型: {}", other)));
            }
        };
        result.validate()?;
        Ok(result)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::IndustryInsight(insight) => insight.validate(),
            Self::CredibilityReport(report) => report.validate(),
        }
    }

    pub fn as_industry_insight(&self) -> Option<&IndustryInsight> {
        match self {
            Self::IndustryInsight(insight) => Some(insight),
            _ => None,
        }
    }

    pub fn as_credibility_report(&self) -> Option<&CredibilityReport> {
        match self {
            Self::CredibilityReport(report) => Some(report),
            _ => None,
        }
    }
}

impl From<IndustryInsight> for TaskResult {
    fn from(insight: IndustryInsight) -> Self {
        Self::IndustryInsight(insight)
    }
}

impl From<CredibilityReport> for TaskResult {
    fn from(report: CredibilityReport) -> Self {
        Self::CredibilityReport(report)
    }
}

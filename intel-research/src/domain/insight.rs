//! Industry research output.

use intel_common::{Error, Result};
use serde::{Deserialize, Serialize};

use super::values::{CredibilityScore, StockCode};

/// A stock related to the researched industry, with its own credibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockCredibility {
    pub stock_code: StockCode,
    pub stock_name: String,
    pub credibility_score: CredibilityScore,
    #[serde(default)]
    pub relevance_summary: String,
}

/// Structured result of an industry research task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryInsight {
    pub industry_name: String,
    pub summary: String,
    /// Upstream → midstream → downstream description
    #[serde(default)]
    pub industry_chain: String,
    #[serde(default)]
    pub technology_routes: Vec<String>,
    #[serde(default)]
    pub market_size: String,
    #[serde(default)]
    pub top_stocks: Vec<StockCredibility>,
    #[serde(default)]
    pub risk_alerts: Vec<String>,
    #[serde(default)]
    pub catalysts: Vec<String>,
    /// Market attention, 0-100
    pub heat_score: u8,
    #[serde(default)]
    pub competitive_landscape: String,
}

impl IndustryInsight {
    pub fn validate(&self) -> Result<()> {
        if self.industry_name.trim().is_empty() {
            return Err(Error::Validation("行业名称不能为空".into()));
        }
        if self.heat_score > 100 {
            return Err(Error::Validation(format!(
                "热度评分必须在 0-100 之间，当前值: {}",
                self.heat_score
            )));
        }
        Ok(())
    }

    /// Stocks at or above the high-credibility threshold.
    pub fn high_credibility_stocks(&self) -> impl Iterator<Item = &StockCredibility> {
        self.top_stocks
            .iter()
            .filter(|s| s.credibility_score.score() >= 80)
    }
}

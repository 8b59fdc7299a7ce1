//! Concept credibility verification output and its scoring rules.

use intel_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::values::{CredibilityScore, StockCode};

/// Weights of the four sub-analyses in the overall score.
pub const MAIN_BUSINESS_WEIGHT: f64 = 0.30;
pub const EVIDENCE_WEIGHT: f64 = 0.25;
pub const HYPE_HISTORY_WEIGHT: f64 = 0.20;
pub const SUPPLY_CHAIN_WEIGHT: f64 = 0.25;

/// Sub-scores below this are treated as a red flag.
const RED_FLAG_THRESHOLD: u8 = 30;

// ============================================================================
// Risk Labels
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLabel {
    PureHype,
    WeakEvidence,
    BusinessMismatch,
    HighDebt,
    FrequentConceptChange,
    SupplyChainRisk,
}

impl RiskLabel {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PureHype => "纯蹭热点",
            Self::WeakEvidence => "证据不足",
            Self::BusinessMismatch => "主业不匹配",
            Self::HighDebt => "高负债风险",
            Self::FrequentConceptChange => "频繁概念切换",
            Self::SupplyChainRisk => "供应链风险",
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ============================================================================
// Sub-analyses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainBusinessMatch {
    pub score: u8,
    #[serde(default)]
    pub main_business_description: String,
    #[serde(default)]
    pub match_analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceAnalysis {
    pub score: u8,
    #[serde(default)]
    pub patents: Vec<String>,
    #[serde(default)]
    pub orders: Vec<String>,
    #[serde(default)]
    pub partnerships: Vec<String>,
    #[serde(default)]
    pub analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypeHistory {
    /// Higher means fewer past hype episodes
    pub score: u8,
    #[serde(default)]
    pub past_concepts: Vec<String>,
    #[serde(default)]
    pub analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyChainLogic {
    pub score: u8,
    #[serde(default)]
    pub upstream: Vec<String>,
    #[serde(default)]
    pub downstream: Vec<String>,
    #[serde(default)]
    pub analysis: String,
}

// ============================================================================
// Report
// ============================================================================

/// Structured result of a credibility verification task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredibilityReport {
    pub stock_code: StockCode,
    pub stock_name: String,
    pub concept: String,
    pub overall_score: CredibilityScore,
    pub main_business_match: MainBusinessMatch,
    pub evidence: EvidenceAnalysis,
    pub hype_history: HypeHistory,
    pub supply_chain_logic: SupplyChainLogic,
    #[serde(default)]
    pub risk_labels: Vec<RiskLabel>,
    #[serde(default)]
    pub conclusion: String,
}

impl CredibilityReport {
    pub fn validate(&self) -> Result<()> {
        if self.concept.trim().is_empty() {
            return Err(Error::Validation("概念不能为空".into()));
        }
        let subs = [
            ("main_business_match", self.main_business_match.score),
            ("evidence", self.evidence.score),
            ("hype_history", self.hype_history.score),
            ("supply_chain_logic", self.supply_chain_logic.score),
        ];
        for (name, score) in subs {
            if score > 100 {
                return Err(Error::Validation(format!(
                    "{} 评分必须在 0-100 之间，当前值: {}",
                    name, score
                )));
            }
        }
        Ok(())
    }
}

/// Weighted overall score, truncated toward zero.
pub fn overall_score(
    main_business: u8,
    evidence: u8,
    hype_history: u8,
    supply_chain: u8,
) -> CredibilityScore {
    let weighted = main_business as f64 * MAIN_BUSINESS_WEIGHT
        + evidence as f64 * EVIDENCE_WEIGHT
        + hype_history as f64 * HYPE_HISTORY_WEIGHT
        + supply_chain as f64 * SUPPLY_CHAIN_WEIGHT;
    CredibilityScore::clamped(weighted as i64)
}

/// Derive risk labels from the four sub-analyses.
pub fn derive_risk_labels(
    main_business: &MainBusinessMatch,
    evidence: &EvidenceAnalysis,
    hype_history: &HypeHistory,
    supply_chain: &SupplyChainLogic,
) -> Vec<RiskLabel> {
    let mut labels = Vec::new();

    let mismatch = main_business.score < RED_FLAG_THRESHOLD;
    let weak = evidence.score < RED_FLAG_THRESHOLD;

    if mismatch {
        labels.push(RiskLabel::BusinessMismatch);
    }
    if weak {
        labels.push(RiskLabel::WeakEvidence);
    }
    if mismatch && weak && hype_history.score < 50 {
        labels.push(RiskLabel::PureHype);
    }
    if hype_history.past_concepts.len() >= 3 || hype_history.score < RED_FLAG_THRESHOLD {
        labels.push(RiskLabel::FrequentConceptChange);
    }
    if supply_chain.score < RED_FLAG_THRESHOLD {
        labels.push(RiskLabel::SupplyChainRisk);
    }

    labels
}

/// One-sentence verdict for the report.
pub fn build_conclusion(
    stock_code: &StockCode,
    concept: &str,
    score: CredibilityScore,
    labels: &[RiskLabel],
) -> String {
    let head = format!(
        "股票 {} 与概念「{}」的可信度评分为 {} 分（{}）",
        stock_code,
        concept,
        score.score(),
        score.level()
    );

    if labels.is_empty() {
        format!("{}，未发现明显风险。", head)
    } else {
        let names: Vec<&str> = labels.iter().map(|l| l.display_name()).collect();
        format!("{}，存在以下风险：{}。", head, names.join("、"))
    }
}

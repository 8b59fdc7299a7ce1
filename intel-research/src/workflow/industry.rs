//! Industry research workflow.
//!
//! Five steps: background overview, market heat (with recent news),
//! candidate screening, batch credibility check and competitive landscape.

use async_trait::async_trait;
use intel_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

use super::{
    ask_json, excerpt, fallback_score, lenient_score, RunContext, StepDescriptor, StepRunner,
    Workflow, WorkflowDeps, FAILED_TEXT, FALLBACK_SCORE,
};
use crate::domain::{CredibilityScore, IndustryInsight, StockCode, StockCredibility, TaskResult};
use crate::providers::{fetch_news_or_empty, news_digest};

pub const INDUSTRY_OVERVIEW: StepDescriptor = StepDescriptor {
    key: "industry_overview",
    display_name: "行业背景速览",
    progress: 20,
};

pub const MARKET_HEAT: StepDescriptor = StepDescriptor {
    key: "market_heat",
    display_name: "市场热度分析",
    progress: 40,
};

pub const STOCK_SCREENING: StepDescriptor = StepDescriptor {
    key: "stock_screening",
    display_name: "标的快速筛选",
    progress: 60,
};

pub const CREDIBILITY_BATCH: StepDescriptor = StepDescriptor {
    key: "credibility_batch",
    display_name: "真实性批量验证",
    progress: 80,
};

pub const COMPETITIVE_LANDSCAPE: StepDescriptor = StepDescriptor {
    key: "competitive_landscape",
    display_name: "竞争格局速览",
    progress: 95,
};

pub const STEPS: [StepDescriptor; 5] = [
    INDUSTRY_OVERVIEW,
    MARKET_HEAT,
    STOCK_SCREENING,
    CREDIBILITY_BATCH,
    COMPETITIVE_LANDSCAPE,
];

const NEWS_DIGEST_LIMIT: usize = 10;
const MAX_LANDSCAPE_STOCKS: usize = 10;

// ============================================================================
// Step outputs
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    #[serde(default)]
    pub industry_summary: String,
    #[serde(default)]
    pub industry_chain: String,
    #[serde(default)]
    pub technology_routes: Vec<String>,
    #[serde(default)]
    pub market_size: String,
}

impl Overview {
    fn failed() -> Self {
        Self {
            industry_summary: FAILED_TEXT.into(),
            industry_chain: FAILED_TEXT.into(),
            technology_routes: Vec::new(),
            market_size: FAILED_TEXT.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketHeat {
    #[serde(default = "fallback_score", deserialize_with = "lenient_score")]
    pub heat_score: u8,
    #[serde(default)]
    pub news_summary: String,
    #[serde(default)]
    pub risk_alerts: Vec<String>,
    #[serde(default)]
    pub catalysts: Vec<String>,
}

impl Default for MarketHeat {
    fn default() -> Self {
        Self {
            heat_score: FALLBACK_SCORE,
            news_summary: String::new(),
            risk_alerts: Vec::new(),
            catalysts: Vec::new(),
        }
    }
}

impl MarketHeat {
    fn failed() -> Self {
        Self {
            news_summary: FAILED_TEXT.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub stock_code: String,
    #[serde(default)]
    pub stock_name: String,
    #[serde(default)]
    pub relevance_summary: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Screening {
    #[serde(default)]
    candidate_stocks: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedStock {
    pub stock_code: String,
    #[serde(default)]
    pub stock_name: String,
    #[serde(default = "fallback_score", deserialize_with = "lenient_score")]
    pub credibility_score: u8,
    #[serde(default)]
    pub relevance_summary: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct VerifiedBatch {
    #[serde(default)]
    verified_stocks: Vec<VerifiedStock>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Landscape {
    #[serde(default)]
    competitive_landscape: String,
}

/// Accumulated output of an industry research run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndustryState {
    pub overview: Overview,
    pub heat: MarketHeat,
    pub candidates: Vec<Candidate>,
    pub verified: Vec<VerifiedStock>,
    pub competitive_landscape: String,
}

impl IndustryState {
    /// Build the final insight, dropping stocks with unusable codes.
    pub fn into_insight(self, industry_name: &str) -> IndustryInsight {
        let mut top_stocks: Vec<StockCredibility> = self
            .verified
            .into_iter()
            .filter_map(|v| match StockCode::parse(&v.stock_code) {
                Ok(code) => Some(StockCredibility {
                    stock_name: if v.stock_name.trim().is_empty() {
                        code.to_string()
                    } else {
                        v.stock_name
                    },
                    stock_code: code,
                    credibility_score: CredibilityScore::clamped(i64::from(v.credibility_score)),
                    relevance_summary: v.relevance_summary,
                }),
                Err(e) => {
                    tracing::warn!(stock_code = %v.stock_code, error = %e, "Skipping stock with invalid code");
                    None
                }
            })
            .collect();
        top_stocks.sort_by_key(|s| Reverse(s.credibility_score.score()));

        IndustryInsight {
            industry_name: industry_name.to_string(),
            summary: self.overview.industry_summary,
            industry_chain: self.overview.industry_chain,
            technology_routes: self.overview.technology_routes,
            market_size: self.overview.market_size,
            top_stocks,
            risk_alerts: self.heat.risk_alerts,
            catalysts: self.heat.catalysts,
            heat_score: self.heat.heat_score.min(100),
            competitive_landscape: self.competitive_landscape,
        }
    }
}

// ============================================================================
// Prompts
// ============================================================================

fn overview_prompt(industry: &str) -> String {
    format!(
        r#"请对「{industry}」行业做一个快速的背景速览。

请输出 JSON：
{{
  "industry_summary": "行业概况，200字以内",
  "industry_chain": "产业链结构：上游 → 中游 → 下游",
  "technology_routes": ["主要技术路线"],
  "market_size": "市场规模及增速"
}}"#
    )
}

fn heat_prompt(industry: &str, summary: &str, news: &str) -> String {
    format!(
        r#"请评估「{industry}」行业当前的市场热度。

行业概况：{summary}

近期新闻：
{news}

请输出 JSON：
{{
  "heat_score": 0到100的整数，越高表示市场关注度越高,
  "news_summary": "近期新闻要点",
  "risk_alerts": ["风险提示"],
  "catalysts": ["潜在催化剂"]
}}"#
    )
}

fn screening_prompt(industry: &str, summary: &str, chain: &str) -> String {
    format!(
        r#"请筛选与「{industry}」行业最相关的 A 股上市公司，给出 5 到 10 只。

行业概况：{summary}
产业链：{chain}

股票代码使用 600519.SH / 000001.SZ 格式。请输出 JSON：
{{
  "candidate_stocks": [
    {{"stock_code": "代码", "stock_name": "名称", "relevance_summary": "与行业的关联"}}
  ]
}}"#
    )
}

fn batch_prompt(industry: &str, candidates: &[Candidate]) -> String {
    let list = candidates
        .iter()
        .map(|c| format!("- {} {}：{}", c.stock_code, c.stock_name, c.relevance_summary))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"以下公司被认为与「{industry}」行业相关，请逐一评估其业务与该行业关联的真实性，剔除纯概念炒作的标的。

{list}

请输出 JSON：
{{
  "verified_stocks": [
    {{"stock_code": "代码", "stock_name": "名称", "credibility_score": 0到100的整数, "relevance_summary": "判断依据"}}
  ]
}}"#
    )
}

fn landscape_prompt(industry: &str, verified: &[VerifiedStock]) -> String {
    let list = if verified.is_empty() {
        "（暂无已验证标的）".to_string()
    } else {
        verified
            .iter()
            .take(MAX_LANDSCAPE_STOCKS)
            .map(|v| format!("- {} {}（可信度 {}）", v.stock_code, v.stock_name, v.credibility_score))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        r#"请概述「{industry}」行业的竞争格局。

主要参与者：
{list}

请输出 JSON：
{{
  "competitive_landscape": "竞争格局描述，300字以内"
}}"#
    )
}

// ============================================================================
// Workflow
// ============================================================================

pub struct IndustryResearchWorkflow {
    deps: WorkflowDeps,
}

impl IndustryResearchWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Workflow for IndustryResearchWorkflow {
    fn name(&self) -> &'static str {
        "industry_research"
    }

    async fn execute(&self, query: &str, ctx: RunContext) -> Result<TaskResult> {
        let industry = query.trim();
        if industry.is_empty() {
            return Err(Error::Validation("行业名称不能为空".into()));
        }

        let reasoning = self.deps.reasoning.as_ref();
        let mut runner: StepRunner<IndustryState> = StepRunner::new(
            self.name(),
            self.deps.retry.clone(),
            self.deps.checkpoints.clone(),
            ctx,
        );

        let prompt = overview_prompt(industry);
        runner
            .run_step(
                &INDUSTRY_OVERVIEW,
                Overview::failed(),
                || ask_json::<Overview>(reasoning, &prompt),
                |s, v| s.overview = v,
            )
            .await?;

        let news = if runner.is_completed(&MARKET_HEAT) {
            String::new()
        } else {
            let items =
                fetch_news_or_empty(self.deps.news.as_ref(), industry, self.deps.news_days).await;
            news_digest(&items, NEWS_DIGEST_LIMIT)
        };
        let prompt = heat_prompt(industry, &excerpt(&runner.state().overview.industry_summary, 500), &news);
        runner
            .run_step(
                &MARKET_HEAT,
                MarketHeat::failed(),
                || ask_json::<MarketHeat>(reasoning, &prompt),
                |s, v| s.heat = v,
            )
            .await?;

        let prompt = {
            let overview = &runner.state().overview;
            screening_prompt(
                industry,
                &excerpt(&overview.industry_summary, 300),
                &excerpt(&overview.industry_chain, 300),
            )
        };
        runner
            .run_step(
                &STOCK_SCREENING,
                Vec::new(),
                || async {
                    ask_json::<Screening>(reasoning, &prompt)
                        .await
                        .map(|s| s.candidate_stocks)
                },
                |s, v| s.candidates = v,
            )
            .await?;

        if runner.state().candidates.is_empty() {
            runner
                .complete_locally(&CREDIBILITY_BATCH, Vec::new(), "无候选标的，跳过验证", |s, v| {
                    s.verified = v
                })
                .await?;
        } else {
            let prompt = batch_prompt(industry, &runner.state().candidates);
            runner
                .run_step(
                    &CREDIBILITY_BATCH,
                    Vec::new(),
                    || async {
                        ask_json::<VerifiedBatch>(reasoning, &prompt)
                            .await
                            .map(|b| b.verified_stocks)
                    },
                    |s, v| s.verified = v,
                )
                .await?;
        }

        let prompt = landscape_prompt(industry, &runner.state().verified);
        runner
            .run_step(
                &COMPETITIVE_LANDSCAPE,
                FAILED_TEXT.to_string(),
                || async {
                    ask_json::<Landscape>(reasoning, &prompt)
                        .await
                        .map(|l| l.competitive_landscape)
                },
                |s, v| s.competitive_landscape = v,
            )
            .await?;

        let insight = runner.finish()?.into_insight(industry);
        insight.validate()?;
        Ok(insight.into())
    }
}

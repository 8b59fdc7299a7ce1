//! Credibility verification workflow.
//!
//! Checks whether a listed company's link to a hot concept is real by
//! scoring four angles: main business match, hard evidence, past hype
//! episodes and supply chain logic.

use async_trait::async_trait;
use intel_common::{Error, Result};
use serde::{Deserialize, Serialize};

use super::{
    ask_json, excerpt, fallback_score, lenient_score, RunContext, StepDescriptor, StepRunner,
    Workflow, WorkflowDeps, FAILED_TEXT, FALLBACK_SCORE,
};
use crate::domain::{
    build_conclusion, derive_risk_labels, overall_score, CredibilityReport, EvidenceAnalysis,
    HypeHistory, MainBusinessMatch, StockCode, SupplyChainLogic, TaskResult,
};
use crate::providers::{
    announcement_digest, fetch_announcements_or_empty, fetch_news_or_empty, news_digest,
};

pub const MAIN_BUSINESS_MATCH: StepDescriptor = StepDescriptor {
    key: "main_business_match",
    display_name: "主营业务匹配分析",
    progress: 25,
};

pub const EVIDENCE_COLLECTION: StepDescriptor = StepDescriptor {
    key: "evidence_collection",
    display_name: "实质证据收集",
    progress: 50,
};

pub const HYPE_HISTORY_DETECTION: StepDescriptor = StepDescriptor {
    key: "hype_history_detection",
    display_name: "历史蹭热点检测",
    progress: 75,
};

pub const SUPPLY_CHAIN_LOGIC: StepDescriptor = StepDescriptor {
    key: "supply_chain_logic",
    display_name: "供应链逻辑分析",
    progress: 90,
};

pub const STEPS: [StepDescriptor; 4] = [
    MAIN_BUSINESS_MATCH,
    EVIDENCE_COLLECTION,
    HYPE_HISTORY_DETECTION,
    SUPPLY_CHAIN_LOGIC,
];

const ANNOUNCEMENT_DIGEST_LIMIT: usize = 10;
const NEWS_DIGEST_LIMIT: usize = 10;

/// Split a `"{stock_code}:{concept}"` task query.
pub fn parse_credibility_query(query: &str) -> Result<(StockCode, String)> {
    let (code, concept) = query
        .split_once(':')
        .ok_or_else(|| Error::Validation(format!("真实性验证查询格式应为 股票代码:概念，实际为: {}", query)))?;
    let concept = concept.trim();
    if concept.is_empty() {
        return Err(Error::Validation("概念不能为空".into()));
    }
    Ok((StockCode::parse(code.trim())?, concept.to_string()))
}

// ============================================================================
// Model replies
// ============================================================================

#[derive(Debug, Deserialize)]
struct MainBusinessReply {
    #[serde(default = "fallback_score", deserialize_with = "lenient_score")]
    score: u8,
    #[serde(default)]
    main_business_description: String,
    #[serde(default)]
    match_analysis: String,
}

impl From<MainBusinessReply> for MainBusinessMatch {
    fn from(r: MainBusinessReply) -> Self {
        Self {
            score: r.score,
            main_business_description: r.main_business_description,
            match_analysis: r.match_analysis,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EvidenceReply {
    #[serde(default = "fallback_score", deserialize_with = "lenient_score")]
    score: u8,
    #[serde(default)]
    patents: Vec<String>,
    #[serde(default)]
    orders: Vec<String>,
    #[serde(default)]
    partnerships: Vec<String>,
    #[serde(default)]
    analysis: String,
}

impl From<EvidenceReply> for EvidenceAnalysis {
    fn from(r: EvidenceReply) -> Self {
        Self {
            score: r.score,
            patents: r.patents,
            orders: r.orders,
            partnerships: r.partnerships,
            analysis: r.analysis,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HypeReply {
    #[serde(default = "fallback_score", deserialize_with = "lenient_score")]
    score: u8,
    #[serde(default)]
    past_concepts: Vec<String>,
    #[serde(default)]
    analysis: String,
}

impl From<HypeReply> for HypeHistory {
    fn from(r: HypeReply) -> Self {
        Self {
            score: r.score,
            past_concepts: r.past_concepts,
            analysis: r.analysis,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SupplyChainReply {
    #[serde(default = "fallback_score", deserialize_with = "lenient_score")]
    score: u8,
    #[serde(default)]
    upstream: Vec<String>,
    #[serde(default)]
    downstream: Vec<String>,
    #[serde(default)]
    analysis: String,
}

impl From<SupplyChainReply> for SupplyChainLogic {
    fn from(r: SupplyChainReply) -> Self {
        Self {
            score: r.score,
            upstream: r.upstream,
            downstream: r.downstream,
            analysis: r.analysis,
        }
    }
}

// ============================================================================
// State
// ============================================================================

fn failed_main_business() -> MainBusinessMatch {
    MainBusinessMatch {
        score: FALLBACK_SCORE,
        main_business_description: FAILED_TEXT.into(),
        match_analysis: FAILED_TEXT.into(),
    }
}

fn failed_evidence() -> EvidenceAnalysis {
    EvidenceAnalysis {
        score: FALLBACK_SCORE,
        patents: Vec::new(),
        orders: Vec::new(),
        partnerships: Vec::new(),
        analysis: FAILED_TEXT.into(),
    }
}

fn failed_hype() -> HypeHistory {
    HypeHistory {
        score: FALLBACK_SCORE,
        past_concepts: Vec::new(),
        analysis: FAILED_TEXT.into(),
    }
}

fn failed_supply_chain() -> SupplyChainLogic {
    SupplyChainLogic {
        score: FALLBACK_SCORE,
        upstream: Vec::new(),
        downstream: Vec::new(),
        analysis: FAILED_TEXT.into(),
    }
}

/// Accumulated output of a credibility run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredibilityState {
    pub main_business: MainBusinessMatch,
    pub evidence: EvidenceAnalysis,
    pub hype_history: HypeHistory,
    pub supply_chain: SupplyChainLogic,
}

impl Default for CredibilityState {
    fn default() -> Self {
        Self {
            main_business: failed_main_business(),
            evidence: failed_evidence(),
            hype_history: failed_hype(),
            supply_chain: failed_supply_chain(),
        }
    }
}

impl CredibilityState {
    pub fn into_report(self, stock_code: StockCode, concept: &str) -> CredibilityReport {
        let score = overall_score(
            self.main_business.score,
            self.evidence.score,
            self.hype_history.score,
            self.supply_chain.score,
        );
        let risk_labels = derive_risk_labels(
            &self.main_business,
            &self.evidence,
            &self.hype_history,
            &self.supply_chain,
        );
        let conclusion = build_conclusion(&stock_code, concept, score, &risk_labels);

        CredibilityReport {
            stock_name: stock_code.to_string(),
            stock_code,
            concept: concept.to_string(),
            overall_score: score,
            main_business_match: self.main_business,
            evidence: self.evidence,
            hype_history: self.hype_history,
            supply_chain_logic: self.supply_chain,
            risk_labels,
            conclusion,
        }
    }
}

// ============================================================================
// Prompts
// ============================================================================

fn main_business_prompt(code: &StockCode, concept: &str, announcements: &str) -> String {
    format!(
        r#"请分析股票 {code} 的主营业务与概念「{concept}」的匹配程度。

近期公告：
{announcements}

请输出 JSON：
{{
  "score": 0到100的整数，越高表示主营业务与概念越匹配,
  "main_business_description": "公司主营业务描述",
  "match_analysis": "匹配度分析"
}}"#
    )
}

fn evidence_prompt(
    code: &StockCode,
    concept: &str,
    main_business: &str,
    announcements: &str,
    news: &str,
) -> String {
    format!(
        r#"请收集股票 {code} 与概念「{concept}」相关的实质性证据。

主营业务：{main_business}

近期公告：
{announcements}

相关新闻：
{news}

请输出 JSON：
{{
  "score": 0到100的整数，越高表示证据越充分,
  "patents": ["相关专利"],
  "orders": ["相关订单或合同"],
  "partnerships": ["相关合作"],
  "analysis": "证据分析"
}}"#
    )
}

fn hype_prompt(code: &StockCode, concept: &str) -> String {
    format!(
        r#"请检测股票 {code} 是否有频繁蹭热点的历史，当前涉及的概念为「{concept}」。

请输出 JSON：
{{
  "score": 0到100的整数，越高表示蹭热点历史越少,
  "past_concepts": ["过去炒作过的概念"],
  "analysis": "历史分析"
}}"#
    )
}

fn supply_chain_prompt(code: &StockCode, concept: &str) -> String {
    format!(
        r#"请分析股票 {code} 在「{concept}」产业链中的位置及其逻辑是否成立。

请输出 JSON：
{{
  "score": 0到100的整数，越高表示供应链逻辑越清晰,
  "upstream": ["上游供应商或原材料"],
  "downstream": ["下游客户或应用"],
  "analysis": "供应链逻辑分析"
}}"#
    )
}

// ============================================================================
// Workflow
// ============================================================================

pub struct CredibilityVerificationWorkflow {
    deps: WorkflowDeps,
}

impl CredibilityVerificationWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Workflow for CredibilityVerificationWorkflow {
    fn name(&self) -> &'static str {
        "credibility_verification"
    }

    async fn execute(&self, query: &str, ctx: RunContext) -> Result<TaskResult> {
        let (code, concept) = parse_credibility_query(query)?;
        let reasoning = self.deps.reasoning.as_ref();
        let mut runner: StepRunner<CredibilityState> = StepRunner::new(
            self.name(),
            self.deps.retry.clone(),
            self.deps.checkpoints.clone(),
            ctx,
        );

        // Announcements feed the first two steps only.
        let announcements = if runner.is_completed(&MAIN_BUSINESS_MATCH)
            && runner.is_completed(&EVIDENCE_COLLECTION)
        {
            String::new()
        } else {
            let items = fetch_announcements_or_empty(
                self.deps.announcements.as_ref(),
                &code,
                self.deps.announcement_days,
            )
            .await;
            announcement_digest(&items, ANNOUNCEMENT_DIGEST_LIMIT)
        };

        let prompt = main_business_prompt(&code, &concept, &announcements);
        runner
            .run_step(
                &MAIN_BUSINESS_MATCH,
                failed_main_business(),
                || async {
                    ask_json::<MainBusinessReply>(reasoning, &prompt)
                        .await
                        .map(MainBusinessMatch::from)
                },
                |s, v| s.main_business = v,
            )
            .await?;

        let news = if runner.is_completed(&EVIDENCE_COLLECTION) {
            String::new()
        } else {
            let items = fetch_news_or_empty(
                self.deps.news.as_ref(),
                &format!("{} {}", code.numeric_code(), concept),
                self.deps.news_days,
            )
            .await;
            news_digest(&items, NEWS_DIGEST_LIMIT)
        };
        let prompt = evidence_prompt(
            &code,
            &concept,
            &excerpt(&runner.state().main_business.main_business_description, 300),
            &announcements,
            &news,
        );
        runner
            .run_step(
                &EVIDENCE_COLLECTION,
                failed_evidence(),
                || async {
                    ask_json::<EvidenceReply>(reasoning, &prompt)
                        .await
                        .map(EvidenceAnalysis::from)
                },
                |s, v| s.evidence = v,
            )
            .await?;

        let prompt = hype_prompt(&code, &concept);
        runner
            .run_step(
                &HYPE_HISTORY_DETECTION,
                failed_hype(),
                || async {
                    ask_json::<HypeReply>(reasoning, &prompt)
                        .await
                        .map(HypeHistory::from)
                },
                |s, v| s.hype_history = v,
            )
            .await?;

        let prompt = supply_chain_prompt(&code, &concept);
        runner
            .run_step(
                &SUPPLY_CHAIN_LOGIC,
                failed_supply_chain(),
                || async {
                    ask_json::<SupplyChainReply>(reasoning, &prompt)
                        .await
                        .map(SupplyChainLogic::from)
                },
                |s, v| s.supply_chain = v,
            )
            .await?;

        let report = runner.finish()?.into_report(code, &concept);
        report.validate()?;
        Ok(report.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentStepStatus, RiskLabel};
    use crate::workflow::testing::{context, deps, RecordingSink, ScriptedReasoning};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_parse_credibility_query() {
        let (code, concept) = parse_credibility_query("600519.SH:AI+白酒").unwrap();
        assert_eq!(code.code(), "600519.SH");
        assert_eq!(concept, "AI+白酒");

        let (_, concept) = parse_credibility_query("000001.SZ: 金融科技:数字货币 ").unwrap();
        assert_eq!(concept, "金融科技:数字货币");

        assert!(parse_credibility_query("600519.SH").is_err());
        assert!(parse_credibility_query("600519.SH:  ").is_err());
        assert!(parse_credibility_query("abc:AI").is_err());
    }

    #[tokio::test]
    async fn test_report_scores_and_labels() {
        let reasoning = Arc::new(
            ScriptedReasoning::new()
                .reply(
                    "main_business_description",
                    json!({"score": 20, "main_business_description": "白酒生产", "match_analysis": "无关"}),
                )
                .reply("patents", json!({"score": 10, "analysis": "无证据"}))
                .reply(
                    "past_concepts",
                    json!({"score": 40, "past_concepts": ["元宇宙"], "analysis": "偶有"}),
                )
                .reply("upstream", json!({"score": "70", "upstream": ["高粱"], "downstream": ["经销商"]})),
        );
        let (deps, _) = deps(reasoning.clone());
        let sink = Arc::new(RecordingSink::default());

        let result = CredibilityVerificationWorkflow::new(deps)
            .execute("600519.SH:AI+白酒", context(sink.clone()))
            .await
            .unwrap();
        let report = result.as_credibility_report().unwrap();

        // 20*0.30 + 10*0.25 + 40*0.20 + 70*0.25 = 34
        assert_eq!(report.overall_score.score(), 34);
        assert_eq!(
            report.risk_labels,
            vec![RiskLabel::BusinessMismatch, RiskLabel::WeakEvidence, RiskLabel::PureHype]
        );
        assert_eq!(report.stock_name, "600519.SH");
        assert!(report.conclusion.contains("存在以下风险"));
        assert_eq!(report.supply_chain_logic.upstream, vec!["高粱"]);

        let progress: Vec<_> = sink.reports().iter().map(|(p, _)| *p).collect();
        assert_eq!(progress, vec![25, 50, 75, 90]);
        assert_eq!(reasoning.calls(), 4);
    }

    #[tokio::test]
    async fn test_failed_step_uses_neutral_fallback() {
        let reasoning = Arc::new(
            ScriptedReasoning::new()
                .reply("main_business_description", json!({"score": 90}))
                .fail("patents")
                .reply("past_concepts", json!({"score": 90}))
                .reply("upstream", json!({"score": 90})),
        );
        let (deps, _) = deps(reasoning);
        let sink = Arc::new(RecordingSink::default());

        let result = CredibilityVerificationWorkflow::new(deps)
            .execute("300750.SZ:固态电池", context(sink.clone()))
            .await
            .unwrap();
        let report = result.as_credibility_report().unwrap();

        assert_eq!(report.evidence.score, 50);
        assert_eq!(report.evidence.analysis, "[分析失败]");
        // 90*0.30 + 50*0.25 + 90*0.20 + 90*0.25 = 80
        assert_eq!(report.overall_score.score(), 80);
        assert!(report.risk_labels.is_empty());

        let exhausted = sink
            .reports()
            .into_iter()
            .find(|(p, s)| *p == 50 && s.status == AgentStepStatus::Failed)
            .unwrap();
        assert_eq!(exhausted.1.agent_name, "实质证据收集");
    }

    #[tokio::test]
    async fn test_invalid_query_fails_before_any_call() {
        let reasoning = Arc::new(ScriptedReasoning::new());
        let (deps, _) = deps(reasoning.clone());
        let err = CredibilityVerificationWorkflow::new(deps)
            .execute("贵州茅台", context(Arc::new(RecordingSink::default())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(reasoning.calls(), 0);
    }
}

//! Integration tests for the investigation task lifecycle.
//!
//! Runs the real workflows against a scripted reasoning client, SQLite
//! storage and the broadcast event channel.

use async_trait::async_trait;
use intel_common::{Error, Result};
use intel_research::domain::{AgentStepStatus, InvestigationTask, TaskId, TaskStatus};
use intel_research::events::{BroadcastEmitter, TASK_COMPLETED, TASK_PROGRESS};
use intel_research::providers::{NullAnnouncementProvider, NullNewsProvider};
use intel_research::reasoning::{
    ChatMessage, Completion, CompletionOptions, ReasoningClient, TokenUsage,
};
use intel_research::retry::RetryPolicy;
use intel_research::service::{InvestigationTaskService, ServiceSettings};
use intel_research::storage::{SqliteTaskRepository, TaskRepository};
use intel_research::workflow::{
    CredibilityVerificationWorkflow, IndustryResearchWorkflow, WorkflowDeps,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers by matching the JSON keys each prompt asks for.
struct KeywordReasoning {
    calls: AtomicU32,
}

#[async_trait]
impl ReasoningClient for KeywordReasoning {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = &messages.last().expect("user message").content;

        let body = if prompt.contains("industry_summary") {
            json!({"industry_summary": "储能行业概况", "industry_chain": "电芯 → PCS → 电站", "market_size": "万亿"})
        } else if prompt.contains("heat_score") {
            json!({"heat_score": 77, "risk_alerts": ["产能过剩"], "catalysts": ["政策补贴"]})
        } else if prompt.contains("candidate_stocks") {
            json!({"candidate_stocks": [{"stock_code": "300750.SZ", "stock_name": "宁德时代"}]})
        } else if prompt.contains("verified_stocks") {
            json!({"verified_stocks": [{"stock_code": "300750.SZ", "stock_name": "宁德时代", "credibility_score": 92}]})
        } else if prompt.contains("competitive_landscape") {
            json!({"competitive_landscape": "龙头集中"})
        } else if prompt.contains("main_business_description") {
            json!({"score": 85, "main_business_description": "动力电池"})
        } else if prompt.contains("patents") {
            json!({"score": 80, "patents": ["固态电解质专利"]})
        } else if prompt.contains("past_concepts") {
            json!({"score": 70, "past_concepts": []})
        } else if prompt.contains("upstream") {
            json!({"score": 75, "upstream": ["锂矿"], "downstream": ["整车厂"]})
        } else {
            return Err(Error::Service("unexpected prompt".into()));
        };

        Ok(Completion {
            content: body.to_string(),
            model: "keyword".into(),
            usage: TokenUsage::default(),
        })
    }
}

struct Stack {
    service: Arc<InvestigationTaskService>,
    repository: Arc<SqliteTaskRepository>,
    events: Arc<BroadcastEmitter>,
    reasoning: Arc<KeywordReasoning>,
    _dir: tempfile::TempDir,
}

fn stack() -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let repository = Arc::new(SqliteTaskRepository::open(dir.path().join("intel.db")).unwrap());
    let checkpoints = Arc::new(repository.checkpoint_store());
    let reasoning = Arc::new(KeywordReasoning {
        calls: AtomicU32::new(0),
    });

    let deps = WorkflowDeps {
        reasoning: reasoning.clone(),
        news: Arc::new(NullNewsProvider),
        announcements: Arc::new(NullAnnouncementProvider),
        checkpoints: checkpoints.clone(),
        retry: RetryPolicy::immediate(3),
        news_days: 7,
        announcement_days: 30,
    };
    let events = Arc::new(BroadcastEmitter::new(256));
    let service = Arc::new(InvestigationTaskService::new(
        repository.clone(),
        checkpoints,
        events.clone(),
        Arc::new(IndustryResearchWorkflow::new(deps.clone())),
        Arc::new(CredibilityVerificationWorkflow::new(deps)),
        ServiceSettings::default(),
    ));

    Stack {
        service,
        repository,
        events,
        reasoning,
        _dir: dir,
    }
}

async fn wait_terminal(service: &InvestigationTaskService, id: &TaskId) -> InvestigationTask {
    for _ in 0..500 {
        let task = service.get_task(id).unwrap().unwrap();
        if task.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} did not reach a terminal state", id);
}

#[tokio::test]
async fn test_industry_research_end_to_end() {
    let s = stack();
    let mut rx = s.events.subscribe();

    let id = s.service.create_industry_research_task("储能").await.unwrap();
    let task = wait_terminal(&s.service, &id).await;

    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task.progress(), 100);
    assert!(task.completed_at().is_some());
    assert!(task.duration().unwrap() >= 0.0);

    let names: Vec<_> = task.agent_steps().iter().map(|s| s.agent_name.as_str()).collect();
    assert_eq!(
        names,
        vec!["行业背景速览", "市场热度分析", "标的快速筛选", "真实性批量验证", "竞争格局速览"]
    );

    let insight = task.result().unwrap().as_industry_insight().unwrap();
    assert_eq!(insight.industry_name, "储能");
    assert_eq!(insight.heat_score, 77);
    assert_eq!(insight.top_stocks.len(), 1);
    assert_eq!(insight.top_stocks[0].credibility_score.score(), 92);
    assert_eq!(s.reasoning.calls.load(Ordering::SeqCst), 5);

    // Progress events arrive in order and end with completion.
    let mut last_progress = 0;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if event.event == TASK_PROGRESS {
            let progress = event.payload["progress"].as_u64().unwrap();
            assert!(progress >= last_progress);
            last_progress = progress;
        }
        if event.event == TASK_COMPLETED {
            assert_eq!(event.payload["result"]["industry_name"], "储能");
            break;
        }
    }
    assert_eq!(last_progress, 95);

    // The stored row rehydrates with its result and history.
    let reloaded = s.repository.find_by_id(&id).unwrap().unwrap();
    assert_eq!(reloaded.status(), TaskStatus::Completed);
    assert_eq!(reloaded.result(), task.result());
    assert_eq!(reloaded.agent_steps().len(), 5);
}

#[tokio::test]
async fn test_credibility_verification_end_to_end() {
    let s = stack();
    let id = s
        .service
        .create_credibility_verification_task("300750.SZ", "固态电池")
        .await
        .unwrap();
    let task = wait_terminal(&s.service, &id).await;

    assert_eq!(task.status(), TaskStatus::Completed);
    let report = task.result().unwrap().as_credibility_report().unwrap();
    // 85*0.30 + 80*0.25 + 70*0.20 + 75*0.25 = 78.25
    assert_eq!(report.overall_score.score(), 78);
    assert!(report.risk_labels.is_empty());
    assert!(report.conclusion.contains("未发现明显风险"));
    assert!(task
        .agent_steps()
        .iter()
        .all(|s| s.status == AgentStepStatus::Completed));
}

#[tokio::test]
async fn test_tasks_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intel.db");

    let id = {
        let repo = SqliteTaskRepository::open(&path).unwrap();
        let task = InvestigationTask::new(
            intel_research::domain::TaskType::IndustryResearch,
            "半导体",
        )
        .unwrap();
        repo.save(&task).unwrap();
        *task.task_id()
    };

    let repo = SqliteTaskRepository::open(&path).unwrap();
    let task = repo.find_by_id(&id).unwrap().unwrap();
    assert_eq!(task.query(), "半导体");
    assert_eq!(task.status(), TaskStatus::Pending);
}

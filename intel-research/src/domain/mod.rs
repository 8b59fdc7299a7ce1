//! Domain model of the intelligence context.
//!
//! - [`task`]: the `InvestigationTask` aggregate and its state machine
//! - [`insight`] / [`report`]: the two structured task outputs
//! - [`values`]: validated identifiers and scores

pub mod insight;
pub mod report;
pub mod result;
pub mod step;
pub mod task;
pub mod values;

pub use insight::{IndustryInsight, StockCredibility};
pub use report::{
    build_conclusion, derive_risk_labels, overall_score, CredibilityReport, EvidenceAnalysis,
    HypeHistory, MainBusinessMatch, RiskLabel, SupplyChainLogic,
};
pub use result::TaskResult;
pub use step::{AgentStep, AgentStepStatus};
pub use task::{FailureCode, InvestigationTask, TaskRecord, TaskStatus, TaskType};
pub use values::{CredibilityLevel, CredibilityScore, Exchange, StockCode, TaskId};

//! News and announcement data providers.
//!
//! Providers report failures through `Result`, but workflows reach them only
//! through [`fetch_news_or_empty`] and [`fetch_announcements_or_empty`]: a
//! broken data source degrades the analysis, it never fails a step.

mod lixin;
mod news;

pub use lixin::LixinAnnouncementProvider;
pub use news::HttpNewsProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intel_common::Result;
use serde::{Deserialize, Serialize};

use crate::domain::StockCode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    #[serde(default)]
    pub source: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub title: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub content: String,
    /// e.g. 定期报告, 临时公告, 重大事项
    #[serde(default)]
    pub announcement_type: String,
}

#[async_trait]
pub trait NewsDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// News mentioning `query` from the last `days` days.
    async fn fetch_news(&self, query: &str, days: u32) -> Result<Vec<NewsItem>>;
}

#[async_trait]
pub trait AnnouncementDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Company announcements from the last `days` days.
    async fn fetch_announcements(&self, stock_code: &StockCode, days: u32)
        -> Result<Vec<Announcement>>;
}

/// Fetch news, newest first, degrading to empty on failure.
pub async fn fetch_news_or_empty(
    provider: &dyn NewsDataProvider,
    query: &str,
    days: u32,
) -> Vec<NewsItem> {
    match provider.fetch_news(query, days).await {
        Ok(mut items) => {
            items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
            tracing::debug!(provider = provider.name(), query, count = items.len(), "Fetched news");
            items
        }
        Err(e) => {
            tracing::warn!(provider = provider.name(), query, error = %e, "News fetch failed, continuing without news");
            Vec::new()
        }
    }
}

/// Fetch announcements, newest first, degrading to empty on failure.
pub async fn fetch_announcements_or_empty(
    provider: &dyn AnnouncementDataProvider,
    stock_code: &StockCode,
    days: u32,
) -> Vec<Announcement> {
    match provider.fetch_announcements(stock_code, days).await {
        Ok(mut items) => {
            items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
            tracing::debug!(
                provider = provider.name(),
                stock_code = %stock_code,
                count = items.len(),
                "Fetched announcements"
            );
            items
        }
        Err(e) => {
            tracing::warn!(
                provider = provider.name(),
                stock_code = %stock_code,
                error = %e,
                "Announcement fetch failed, continuing without announcements"
            );
            Vec::new()
        }
    }
}

/// Prompt-ready digest of the most recent news.
pub fn news_digest(items: &[NewsItem], limit: usize) -> String {
    if items.is_empty() {
        return "（暂无相关新闻）".to_string();
    }
    items
        .iter()
        .take(limit)
        .map(|n| {
            format!(
                "- [{}] {}（{}）：{}",
                n.published_at.format("%Y-%m-%d"),
                n.title,
                n.source,
                n.summary
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt-ready digest of the most recent announcements.
pub fn announcement_digest(items: &[Announcement], limit: usize) -> String {
    if items.is_empty() {
        return "（暂无相关公告）".to_string();
    }
    items
        .iter()
        .take(limit)
        .map(|a| {
            let mut line = format!(
                "- [{}] {}（{}）",
                a.published_at.format("%Y-%m-%d"),
                a.title,
                a.announcement_type
            );
            if !a.content.is_empty() {
                let excerpt: String = a.content.chars().take(200).collect();
                line.push_str("：");
                line.push_str(&excerpt);
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Null providers
// ============================================================================

/// News provider used when no news source is configured.
pub struct NullNewsProvider;

#[async_trait]
impl NewsDataProvider for NullNewsProvider {
    fn name(&self) -> &str {
        "null"
    }

    async fn fetch_news(&self, _query: &str, _days: u32) -> Result<Vec<NewsItem>> {
        Ok(Vec::new())
    }
}

/// Announcement provider used when no Lixinger token is configured.
pub struct NullAnnouncementProvider;

#[async_trait]
impl AnnouncementDataProvider for NullAnnouncementProvider {
    fn name(&self) -> &str {
        "null"
    }

    async fn fetch_announcements(
        &self,
        _stock_code: &StockCode,
        _days: u32,
    ) -> Result<Vec<Announcement>> {
        Ok(Vec::new())
    }
}

//! 理杏仁 (Lixinger) company announcement adapter.
//!
//! # API Documentation
//! https://www.lixinger.com/open/api/doc?api-key=cn/company/announcement
//!
//! Requires an API token. Responses use `code: 1` for success.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use intel_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Announcement, AnnouncementDataProvider};
use crate::domain::StockCode;

/// Lixinger API base URL
const LIXIN_API_BASE: &str = "https://open.lixinger.com/api";

/// Company announcement endpoint
const ANNOUNCEMENT_ENDPOINT: &str = "/cn/company/announcement";

pub struct LixinAnnouncementProvider {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl LixinAnnouncementProvider {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            token: token.into(),
            base_url: LIXIN_API_BASE.to_string(),
        })
    }

    /// Point at a different API root (mirrors, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn call_api(&self, request: &LixinAnnouncementRequest) -> Result<Vec<LixinAnnouncement>> {
        let url = format!("{}{}", self.base_url, ANNOUNCEMENT_ENDPOINT);
        debug!(url = %url, stock_code = %request.stock_code, "Calling Lixinger API");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout("Lixinger request timeout".into())
                } else {
                    Error::Service(format!("Lixinger request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Config("Invalid Lixinger API token".into()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Service(format!("Lixinger HTTP {}: {}", status, body)));
        }

        let result: LixinResponse = response
            .json()
            .await
            .map_err(|e| Error::Service(format!("Failed to parse Lixinger response: {}", e)))?;

        if let Some(error) = result.error {
            return Err(Error::Service(format!(
                "Lixinger API error {}: {}",
                error.name.as_deref().unwrap_or("Unknown"),
                error.message.as_deref().unwrap_or("")
            )));
        }
        if result.code != 1 {
            return Err(Error::Service(format!(
                "Lixinger API error code {}: {}",
                result.code,
                result.message.unwrap_or_default()
            )));
        }

        Ok(result.data.unwrap_or_default())
    }
}

#[async_trait]
impl AnnouncementDataProvider for LixinAnnouncementProvider {
    fn name(&self) -> &str {
        "lixin"
    }

    async fn fetch_announcements(
        &self,
        stock_code: &StockCode,
        days: u32,
    ) -> Result<Vec<Announcement>> {
        let today = Utc::now().date_naive();
        let start = today - chrono::Duration::days(i64::from(days));

        let request = LixinAnnouncementRequest {
            token: self.token.clone(),
            stock_code: stock_code.numeric_code().to_string(),
            start_date: start.format("%Y-%m-%d").to_string(),
            end_date: today.format("%Y-%m-%d").to_string(),
        };

        let raw = self.call_api(&request).await?;
        let announcements: Vec<Announcement> =
            raw.into_iter().filter_map(LixinAnnouncement::into_announcement).collect();

        debug!(
            stock_code = %stock_code,
            count = announcements.len(),
            "Fetched announcements from Lixin"
        );
        Ok(announcements)
    }
}

// ============================================================================
// Lixinger API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct LixinAnnouncementRequest {
    token: String,
    #[serde(rename = "stockCode")]
    stock_code: String,
    #[serde(rename = "startDate")]
    start_date: String,
    #[serde(rename = "endDate")]
    end_date: String,
}

#[derive(Debug, Deserialize)]
struct LixinResponse {
    /// 1 = success, 0 = error
    code: i32,
    #[serde(alias = "msg")]
    message: Option<String>,
    data: Option<Vec<LixinAnnouncement>>,
    error: Option<LixinError>,
}

#[derive(Debug, Deserialize)]
struct LixinError {
    name: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LixinAnnouncement {
    /// ISO 8601, e.g. `2025-03-28T00:00:00+08:00`
    date: String,
    #[serde(rename = "linkUrl", default)]
    link_url: String,
    #[serde(rename = "linkText")]
    link_text: String,
    #[serde(default)]
    types: Vec<String>,
}

impl LixinAnnouncement {
    fn into_announcement(self) -> Option<Announcement> {
        let published_at = parse_lixin_date(&self.date)?;
        let announcement_type = self
            .types
            .first()
            .map(|t| announcement_type_name(t))
            .unwrap_or("其他")
            .to_string();

        Some(Announcement {
            title: self.link_text,
            published_at,
            content: self.link_url,
            announcement_type,
        })
    }
}

fn parse_lixin_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn announcement_type_name(code: &str) -> &str {
    match code {
        "fs" => "定期报告",
        "sm" => "股本事项",
        "bm" => "董事会",
        "other" => "其他",
        other => other,
    }
}

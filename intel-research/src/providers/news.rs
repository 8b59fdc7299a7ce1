//! News provider backed by a JSON search endpoint.
//!
//! The endpoint is queried as `GET {endpoint}?q={query}&days={days}` and
//! answers `{"items": [NewsItem, ...]}`.

use async_trait::async_trait;
use intel_common::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

use super::{NewsDataProvider, NewsItem};

pub struct HttpNewsProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNewsProvider {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    items: Vec<NewsItem>,
}

#[async_trait]
impl NewsDataProvider for HttpNewsProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_news(&self, query: &str, days: u32) -> Result<Vec<NewsItem>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query.to_string()), ("days", days.to_string())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("新闻接口请求超时: {}", e))
                } else {
                    Error::Service(format!("新闻接口请求失败: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Service(format!("新闻接口返回 HTTP {}: {}", status, body)));
        }

        let parsed: NewsResponse = response
            .json()
            .await
            .map_err(|e| Error::Service(format!("新闻接口响应解析失败: {}", e)))?;
        Ok(parsed.items)
    }
}

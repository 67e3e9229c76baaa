use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tidepool_core::blockchain::block::Hash;

use super::UncleInfo;

#[derive(Debug, Deserialize)]
struct UncleInfoResponse {
    depth: u64,
}

/// Explorer lookup: `GET <base_url><hash>` returning `{"depth": n, ...}`.
pub struct HttpUncleInfo {
    base_url: String,
    client: reqwest::Client,
}

impl HttpUncleInfo {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl UncleInfo for HttpUncleInfo {
    async fn depth(&self, hash: &Hash) -> Option<u64> {
        let url = format!("{}{}", self.base_url, hash);
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Uncle info request for {} failed: {}", hash, e);
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!("Uncle info for {} returned {}", hash, resp.status());
            return None;
        }
        match resp.json::<UncleInfoResponse>().await {
            Ok(info) => Some(info.depth),
            Err(e) => {
                tracing::warn!("Uncle info for {} unreadable: {}", hash, e);
                None
            }
        }
    }
}

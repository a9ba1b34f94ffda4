use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use relay_core::{KeyRecord, ModelFamily, Service};

use crate::classify::{classify_http_error, CheckFailure};
use crate::service_ops::{CheckSuccess, ServiceOps};

pub struct MistralOps {
    client: Client,
}

impl MistralOps {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn model_families(ids: &[String]) -> HashSet<ModelFamily> {
        ids.iter()
            .filter_map(|id| relay_core::model_family_for(Service::Mistral, id))
            .collect()
    }
}

#[async_trait]
impl ServiceOps for MistralOps {
    fn service(&self) -> Service {
        Service::Mistral
    }

    fn recheck_enabled(&self) -> bool {
        false
    }

    fn check_period(&self) -> Duration {
        Duration::from_secs(60 * 60)
    }

    async fn test_key(&self, key: &KeyRecord) -> Result<CheckSuccess, CheckFailure> {
        let secret = key.expose_secret().to_string();

        let resp = self
            .client
            .get("https://api.mistral.ai/v1/models")
            .bearer_auth(&secret)
            .send()
            .await
            .map_err(|e| CheckFailure::Unexpected(e.to_string()))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &body));
        }

        let body: serde_json::Value =
            resp.json().await.map_err(|e| CheckFailure::Unexpected(e.to_string()))?;
        let ids: Vec<String> = body
            .get("data")
            .and_then(|d| d.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|e| e.get("id").and_then(|v| v.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(CheckSuccess::families(Self::model_families(&ids)))
    }
}

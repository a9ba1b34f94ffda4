use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use relay_core::{KeyRecord, ModelFamily, ProviderState, Service};

use crate::classify::{classify_http_error, CheckFailure};
use crate::service_ops::{CheckSuccess, ServiceOps};

const API_VERSION: &str = "2023-12-01-preview";

pub struct AzureOps {
    client: Client,
}

impl AzureOps {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn endpoint(resource: &str, deployment: &str, path: &str) -> String {
        format!(
            "https://{resource}.openai.azure.com/openai/deployments/{deployment}/{path}?api-version={API_VERSION}"
        )
    }
}

#[async_trait]
impl ServiceOps for AzureOps {
    fn service(&self) -> Service {
        Service::Azure
    }

    fn recheck_enabled(&self) -> bool {
        false
    }

    fn check_period(&self) -> Duration {
        Duration::from_secs(3 * 60)
    }

    async fn test_key(&self, key: &KeyRecord) -> Result<CheckSuccess, CheckFailure> {
        let secret = key.expose_secret().to_string();
        let (resource, deployment) = key.with_state(|s| match &s.provider_state {
            ProviderState::Azure { resource, deployment } => (resource.clone(), deployment.clone()),
            _ => (String::new(), String::new()),
        });

        let one_token = self
            .client
            .post(Self::endpoint(&resource, &deployment, "chat/completions"))
            .header("api-key", &secret)
            .json(&serde_json::json!({
                "messages": [{"role": "user", "content": "hi"}],
                "max_tokens": 1,
            }))
            .send()
            .await
            .map_err(|e| CheckFailure::Unexpected(e.to_string()))?;

        let status = one_token.status().as_u16();
        if status != 200 {
            let body = one_token.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &body));
        }

        // Oversized-context probe to disambiguate GPT-4 from GPT-4 Turbo by
        // whether the error comes back as `context_length_exceeded` (§4.2).
        let oversized = "x".repeat(40_000);
        let probe = self
            .client
            .post(Self::endpoint(&resource, &deployment, "chat/completions"))
            .header("api-key", &secret)
            .json(&serde_json::json!({
                "messages": [{"role": "user", "content": oversized}],
                "max_tokens": 1,
            }))
            .send()
            .await
            .map_err(|e| CheckFailure::Unexpected(e.to_string()))?;

        let probe_body: serde_json::Value = probe.json().await.unwrap_or(serde_json::Value::Null);
        let is_gpt4 = probe_body
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_str())
            == Some("context_length_exceeded");

        let mut families = HashSet::new();
        families.insert(if is_gpt4 { ModelFamily::AzureGpt4 } else { ModelFamily::AzureGpt4Turbo });

        Ok(CheckSuccess::families(families))
    }
}

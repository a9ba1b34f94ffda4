use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use relay_core::{KeyRecord, KeyState, ModelFamily, Service};

use crate::classify::classify_http_error;
use crate::service_ops::{CheckSuccess, ServiceOps};

/// Trial keys report `x-ratelimit-limit-requests` at or below this; used to
/// flag `trial` during the initial probe (§4.2).
const TRIAL_RPM_CEILING: u64 = 250;

pub struct OpenAiOps {
    client: Client,
}

impl OpenAiOps {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn model_to_family(model: &str) -> Option<ModelFamily> {
        relay_core::model_family_for(Service::OpenAi, model)
    }
}

#[async_trait]
impl ServiceOps for OpenAiOps {
    fn service(&self) -> Service {
        Service::OpenAi
    }

    fn recheck_enabled(&self) -> bool {
        false
    }

    fn check_period(&self) -> Duration {
        Duration::from_secs(60 * 60)
    }

    fn candidate_ok(&self, state: &KeyState, family: ModelFamily) -> bool {
        // gpt4-32k keys are conserved: a key without 32k access is preferred,
        // but one with it is still a valid candidate for everything else.
        let _ = (state, family);
        true
    }

    fn secondary_priority(&self, state: &KeyState, family: ModelFamily) -> u8 {
        let trial_preferred = family != ModelFamily::DallE && state.trial == Some(true);
        let conserves_32k = !matches!(family, ModelFamily::Gpt4_32k)
            && !state.model_families.contains(&ModelFamily::Gpt4_32k);
        match (trial_preferred, conserves_32k) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        }
    }

    async fn test_key(&self, key: &KeyRecord) -> Result<CheckSuccess, crate::classify::CheckFailure> {
        let secret = key.expose_secret().to_string();

        let models_resp = self
            .client
            .get("https://api.openai.com/v1/models")
            .bearer_auth(&secret)
            .send()
            .await
            .map_err(|e| crate::classify::CheckFailure::Unexpected(e.to_string()))?;

        if !models_resp.status().is_success() {
            let status = models_resp.status().as_u16();
            let body = models_resp.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &body));
        }

        let body: serde_json::Value = models_resp
            .json()
            .await
            .map_err(|e| crate::classify::CheckFailure::Unexpected(e.to_string()))?;

        let mut has_32k_snapshot = false;
        let mut families: HashSet<ModelFamily> = HashSet::new();
        if let Some(list) = body.get("data").and_then(|d| d.as_array()) {
            for entry in list {
                let Some(id) = entry.get("id").and_then(|v| v.as_str()) else { continue };
                if id.contains("32k") {
                    has_32k_snapshot = true;
                }
                if let Some(family) = Self::model_to_family(id) {
                    families.insert(family);
                }
            }
        }
        if has_32k_snapshot {
            families.insert(ModelFamily::Gpt4_32k);
        }

        // Deliberately malformed completion against babbage-002 to read the
        // rate-limit headers and confirm live auth (§4.2).
        let probe = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&secret)
            .json(&serde_json::json!({ "model": "babbage-002", "messages": "not-an-array" }))
            .send()
            .await
            .map_err(|e| crate::classify::CheckFailure::Unexpected(e.to_string()))?;

        let trial = probe
            .headers()
            .get("x-ratelimit-limit-requests")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|rpm| rpm <= TRIAL_RPM_CEILING)
            .unwrap_or(false);

        if probe.status().as_u16() != 400 {
            let status = probe.status().as_u16();
            let text = probe.text().await.unwrap_or_default();
            if !(200..300).contains(&status) {
                return Err(classify_http_error(status, &text));
            }
        }

        key.with_state_mut(|s| s.trial = Some(trial));

        let org_clones = self.discover_org_clones(&secret).await;

        Ok(CheckSuccess { families, org_clones })
    }
}

impl OpenAiOps {
    async fn discover_org_clones(&self, secret: &str) -> Vec<crate::service_ops::OrgClone> {
        let resp = match self
            .client
            .get("https://api.openai.com/v1/organizations")
            .bearer_auth(secret)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            _ => return Vec::new(),
        };
        let Ok(body) = resp.json::<serde_json::Value>().await else { return Vec::new() };
        let Some(orgs) = body.get("data").and_then(|d| d.as_array()) else { return Vec::new() };

        orgs.iter()
            .filter(|o| o.get("is_default").and_then(|v| v.as_bool()) != Some(true))
            .filter_map(|o| o.get("id").and_then(|v| v.as_str()))
            .map(|org_id| crate::service_ops::OrgClone {
                org_id: org_id.to_string(),
                secret: secrecy::SecretString::from(secret.to_string()),
                provider_state: relay_core::ProviderState::OpenAi {
                    org_id: Some(org_id.to_string()),
                    trial: false,
                    has_32k_access: false,
                    reset_requests_ms: None,
                    reset_tokens_ms: None,
                },
            })
            .collect()
    }
}

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;

use relay_core::{AwsLoggingStatus, KeyRecord, ModelFamily, ProviderState, Service};

use crate::classify::CheckFailure;
use crate::service_ops::{CheckSuccess, ServiceOps};
use crate::sigv4;

/// Claude variants probed on each AWS key; an intentionally invalid `invoke`
/// distinguishes "enabled" (HTTP 400 ValidationException about `max_tokens`)
/// from "not enabled" (HTTP 403) per model (§4.2).
const CANDIDATE_MODELS: &[(&str, ModelFamily)] = &[
    ("anthropic.claude-v2", ModelFamily::AwsClaude),
    ("anthropic.claude-3-opus-20240229-v1:0", ModelFamily::AwsClaudeOpus),
];

pub struct AwsOps {
    client: Client,
}

impl AwsOps {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn host(region: &str) -> String {
        format!("bedrock-runtime.{region}.amazonaws.com")
    }

    async fn probe_model(&self, access_key: &str, secret_key: &str, region: &str, model: &str) -> Result<bool, CheckFailure> {
        let host = Self::host(region);
        let path = format!("/model/{model}/invoke");
        let body = br#"{"invalid_field_to_trigger_validation_error": true}"#;
        let now = Utc::now();
        let signed = sigv4::sign(access_key, secret_key, region, &host, &path, body, now);

        let resp = self
            .client
            .post(format!("https://{host}{path}"))
            .header("host", &host)
            .header("content-type", "application/json")
            .header("x-amz-date", signed.x_amz_date)
            .header("x-amz-content-sha256", signed.x_amz_content_sha256)
            .header("authorization", signed.authorization)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| CheckFailure::Unexpected(e.to_string()))?;

        match resp.status().as_u16() {
            400 => {
                let text = resp.text().await.unwrap_or_default();
                Ok(text.contains("ValidationException") && text.contains("max_tokens"))
            }
            403 => Ok(false),
            401 => Err(CheckFailure::Revoked),
            status => {
                let text = resp.text().await.unwrap_or_default();
                if text.contains("UnrecognizedClientException") {
                    Err(CheckFailure::Revoked)
                } else {
                    Err(crate::classify::classify_http_error(status, &text))
                }
            }
        }
    }

    async fn logging_status(&self, access_key: &str, secret_key: &str, region: &str) -> AwsLoggingStatus {
        let host = format!("bedrock.{region}.amazonaws.com");
        let path = "/logging/modelinvocations".to_string();
        let now = Utc::now();
        let signed = sigv4::sign(access_key, secret_key, region, &host, &path, b"", now);

        let resp = self
            .client
            .get(format!("https://{host}{path}"))
            .header("host", &host)
            .header("content-type", "application/json")
            .header("x-amz-date", signed.x_amz_date)
            .header("x-amz-content-sha256", signed.x_amz_content_sha256)
            .header("authorization", signed.authorization)
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                let body: serde_json::Value = r.json().await.unwrap_or(serde_json::Value::Null);
                let enabled = body
                    .get("loggingConfig")
                    .and_then(|c| c.get("textDataDeliveryEnabled"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if enabled {
                    AwsLoggingStatus::Enabled
                } else {
                    AwsLoggingStatus::Disabled
                }
            }
            _ => AwsLoggingStatus::Unknown,
        }
    }
}

#[async_trait]
impl ServiceOps for AwsOps {
    fn service(&self) -> Service {
        Service::Aws
    }

    fn check_period(&self) -> Duration {
        Duration::from_secs(90 * 60)
    }

    fn candidate_ok(&self, state: &relay_core::KeyState, _family: ModelFamily) -> bool {
        !matches!(
            &state.provider_state,
            ProviderState::Aws { logging_status: AwsLoggingStatus::Enabled, .. }
        )
    }

    async fn test_key(&self, key: &KeyRecord) -> Result<CheckSuccess, CheckFailure> {
        let (access_key, secret_key, region) = {
            let raw = key.expose_secret();
            let mut parts = raw.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(a), Some(s), Some(r)) => (a.to_string(), s.to_string(), r.to_string()),
                _ => return Err(CheckFailure::Unexpected("malformed aws credential".into())),
            }
        };

        let mut families = HashSet::new();
        for (model, family) in CANDIDATE_MODELS {
            if self.probe_model(&access_key, &secret_key, &region, model).await? {
                families.insert(*family);
            }
        }

        let logging_status = self.logging_status(&access_key, &secret_key, &region).await;
        key.with_state_mut(|s| {
            if let ProviderState::Aws { logging_status: ls, .. } = &mut s.provider_state {
                *ls = logging_status;
            }
        });

        Ok(CheckSuccess::families(families))
    }
}

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::Serialize;

use relay_core::{KeyRecord, ModelFamily, ProviderState, Service};

use crate::classify::CheckFailure;
use crate::service_ops::{CheckSuccess, ServiceOps};

const CANDIDATE_MODELS: &[(&str, ModelFamily)] = &[
    ("claude-instant-1", ModelFamily::GcpClaudeInstant),
    ("claude-2.1", ModelFamily::GcpClaude),
    ("claude-3-opus@001", ModelFamily::GcpClaudeOpus),
];

#[derive(Serialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

pub struct GcpOps {
    client: Client,
}

impl GcpOps {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Mints a self-signed JWT with the service account's private key and
    /// exchanges it for a short-lived OAuth access token (§4.2, §6).
    pub async fn mint_access_token(&self, client_email: &str, private_key_pem: &str) -> Result<String, CheckFailure> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: client_email.to_string(),
            scope: "https://www.googleapis.com/auth/cloud-platform".to_string(),
            aud: "https://oauth2.googleapis.com/token".to_string(),
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| CheckFailure::Unexpected(format!("invalid gcp private key: {e}")))?;
        let jwt = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| CheckFailure::Unexpected(format!("jwt signing failed: {e}")))?;

        let resp = self
            .client
            .post("https://oauth2.googleapis.com/token")
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", jwt.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CheckFailure::Unexpected(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(crate::classify::classify_http_error(status, &body));
        }

        let body: serde_json::Value =
            resp.json().await.map_err(|e| CheckFailure::Unexpected(e.to_string()))?;
        body.get("access_token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CheckFailure::Unexpected("token exchange response missing access_token".into()))
    }

    async fn probe_model(&self, token: &str, project_id: &str, region: &str, model: &str) -> Result<bool, CheckFailure> {
        let url = format!(
            "https://{region}-aiplatform.googleapis.com/v1/projects/{project_id}/locations/{region}/publishers/anthropic/models/{model}:streamRawPredict"
        );
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "invalid_field_to_trigger_validation_error": true }))
            .send()
            .await
            .map_err(|e| CheckFailure::Unexpected(e.to_string()))?;

        match resp.status().as_u16() {
            400 => Ok(true),
            403 => Ok(false),
            401 => Err(CheckFailure::Revoked),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(crate::classify::classify_http_error(status, &body))
            }
        }
    }
}

/// GCP composite credentials carry the private key as base64 (§6); decode it
/// back to PEM text before handing it to the JWT signer.
fn decode_private_key(raw: &str) -> Result<String, CheckFailure> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| CheckFailure::Unexpected(format!("invalid base64 gcp private key: {e}")))?;
    String::from_utf8(bytes).map_err(|e| CheckFailure::Unexpected(format!("gcp private key is not utf8: {e}")))
}

#[async_trait]
impl ServiceOps for GcpOps {
    fn service(&self) -> Service {
        Service::Gcp
    }

    fn check_period(&self) -> Duration {
        Duration::from_secs(90 * 60)
    }

    async fn test_key(&self, key: &KeyRecord) -> Result<CheckSuccess, CheckFailure> {
        let (project_id, region, client_email) = key.with_state(|s| match &s.provider_state {
            ProviderState::Gcp { project_id, region, client_email } => {
                (project_id.clone(), region.clone(), client_email.clone())
            }
            _ => (String::new(), String::new(), String::new()),
        });
        let private_key_pem = decode_private_key(key.expose_secret())?;

        let token = self.mint_access_token(&client_email, &private_key_pem).await?;

        let mut families = HashSet::new();
        for (model, family) in CANDIDATE_MODELS {
            if self.probe_model(&token, &project_id, &region, model).await? {
                families.insert(*family);
            }
        }

        Ok(CheckSuccess::families(families))
    }
}
